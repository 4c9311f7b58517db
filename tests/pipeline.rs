//! End-to-end pipeline scenarios over in-memory fakes
//!
//! Exercises the orchestrator against fake adapters, a scripted model
//! endpoint, a deterministic embedder, and a recording mail transport.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use newsbrief::cancel::CancelToken;
use newsbrief::config::{SourceKind, StoreConfig};
use newsbrief::embed::Embedder;
use newsbrief::error::{Error, FetchErrorKind, ModelError, Result};
use newsbrief::fetch::FetchCoordinator;
use newsbrief::index::{EmbeddingIndexer, MetadataFilter, VectorRecord, VectorStore};
use newsbrief::llm::{
    CompletionRequest, IntroService, ModelClient, ModelEndpoint, ScoreService, SummaryService,
};
use newsbrief::mail::{DigestMailer, MailTransport};
use newsbrief::pipeline::{Pipeline, PipelineOptions, Stage};
use newsbrief::profile::UserProfile;
use newsbrief::rank::Ranker;
use newsbrief::retrieve::SemanticRetriever;
use newsbrief::sources::{FetchedItem, SourceAdapter};
use newsbrief::store::{
    ArticleKind, Category, RecordStore, RunStatus, SummaryRecord, VideoItem, WebItem,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Source adapter with preset items and optional scripted failure
struct FakeAdapter {
    name: String,
    items: Vec<FetchedItem>,
    failure: Option<bool>, // Some(retriable)
    transcript: Option<String>,
}

impl FakeAdapter {
    fn with_items(name: &str, items: Vec<FetchedItem>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            items,
            failure: None,
            transcript: None,
        })
    }

    fn failing(name: &str, retriable: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            items: Vec::new(),
            failure: Some(retriable),
            transcript: None,
        })
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Syndication
    }

    fn owns(&self, item: &FetchedItem) -> bool {
        match item {
            FetchedItem::Video(v) => v.channel_id == self.name,
            FetchedItem::Web(w) => w.source_name == self.name,
        }
    }

    async fn fetch(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<FetchedItem>> {
        if let Some(retriable) = self.failure {
            if retriable {
                return Err(Error::fetch_retriable(&self.name, FetchErrorKind::Network, "down"));
            }
            return Err(Error::fetch_fatal(&self.name, FetchErrorKind::Parse, "broken"));
        }
        Ok(self
            .items
            .iter()
            .filter(|i| i.published_at() >= since && i.published_at() <= now)
            .cloned()
            .collect())
    }

    async fn enrich(&self, item: &FetchedItem) -> Result<Option<String>> {
        match item {
            FetchedItem::Video(_) => Ok(self.transcript.clone()),
            FetchedItem::Web(_) => Ok(None),
        }
    }
}

/// Scripted model endpoint: answers summarize/score/intro calls by shape
struct FakeModel {
    scores: HashMap<String, f32>,
    rate_limits_remaining: AtomicU32,
    retry_after: Duration,
    summarize_calls: AtomicU32,
}

impl FakeModel {
    fn new(scores: HashMap<String, f32>) -> Arc<Self> {
        Arc::new(Self {
            scores,
            rate_limits_remaining: AtomicU32::new(0),
            retry_after: Duration::from_millis(0),
            summarize_calls: AtomicU32::new(0),
        })
    }

    fn rate_limited(scores: HashMap<String, f32>, limited_calls: u32, retry_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            scores,
            rate_limits_remaining: AtomicU32::new(limited_calls),
            retry_after,
            summarize_calls: AtomicU32::new(0),
        })
    }

    fn prompt_field<'a>(prompt: &'a str, prefix: &str) -> Option<&'a str> {
        prompt.lines().find_map(|l| l.strip_prefix(prefix))
    }
}

#[async_trait]
impl ModelEndpoint for FakeModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if request.system.contains("news analyst") {
            self.summarize_calls.fetch_add(1, Ordering::SeqCst);

            let remaining = self.rate_limits_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rate_limits_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Model(ModelError::rate_limited(
                    Some(self.retry_after),
                    "throttled",
                )));
            }

            let title = Self::prompt_field(&request.prompt, "Original title: ").unwrap_or("Item");
            return Ok(format!(
                r#"{{"title": "Digest {title}", "summary": "Summary of {title}. Worth a look."}}"#
            ));
        }

        if request.system.contains("curator") {
            let title = Self::prompt_field(&request.prompt, "Title: ").unwrap_or("");
            let score = self.scores.get(title).copied().unwrap_or(5.0);
            return Ok(format!(
                r#"{{"score": {score}, "relevance": {score}, "depth": 5, "novelty": 5,
                    "alignment": 5, "actionability": 5, "reasoning": "scripted"}}"#
            ));
        }

        Ok(r#"{"greeting": "Hi,", "overview": "Here is today's digest."}"#.to_string())
    }
}

/// Deterministic embedder: one axis per known keyword
struct KeywordEmbedder {
    keywords: Vec<String>,
}

impl KeywordEmbedder {
    fn new(keywords: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        })
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let dim = self.dimension();
        Ok(texts
            .into_iter()
            .map(|text| {
                let axis = self
                    .keywords
                    .iter()
                    .position(|k| text.contains(k.as_str()))
                    .unwrap_or(dim - 1);
                let mut v = vec![0.0; dim];
                v[axis] = 1.0;
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.keywords.len() + 1
    }

    fn model_name(&self) -> &str {
        "keyword-fake"
    }
}

/// Mail transport that records submissions
struct RecordingTransport {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), html.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    pipeline: Pipeline,
    store: RecordStore,
    vectors: Arc<VectorStore>,
    model: Arc<FakeModel>,
    transport: Arc<RecordingTransport>,
    embedder: Arc<KeywordEmbedder>,
    _tmp: TempDir,
}

async fn harness(
    adapters: Vec<Arc<dyn SourceAdapter>>,
    model: Arc<FakeModel>,
    keywords: &[&str],
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let store = RecordStore::connect(
        &StoreConfig {
            db_file: tmp.path().join("test.db"),
        },
        8,
    )
    .await
    .unwrap();
    store.init_schema().await.unwrap();

    let embedder = KeywordEmbedder::new(keywords);
    let vectors = Arc::new(
        VectorStore::open(tmp.path(), "test", embedder.dimension())
            .await
            .unwrap(),
    );

    let endpoint: Arc<dyn ModelEndpoint> = model.clone();
    let client = ModelClient::new(endpoint, Arc::new(Semaphore::new(4)), Duration::from_secs(5), 4);

    let summarizer = SummaryService::new(client.clone(), "m".to_string(), 0.7, 512, 12_000, 2);
    let scorer = ScoreService::new(client.clone(), "m".to_string(), 0.3, 512);
    let intro = IntroService::new(client, "m".to_string(), 0.7, 256);

    let indexer = EmbeddingIndexer::new(
        embedder.clone(),
        vectors.clone(),
        store.clone(),
        0.95,
        32,
    );
    let retriever = SemanticRetriever::new(embedder.clone(), vectors.clone());
    let ranker = Ranker::new(
        retriever,
        scorer,
        store.clone(),
        UserProfile::default(),
        3,
        4,
    );

    let transport = RecordingTransport::new();
    let mailer = DigestMailer::new(
        intro,
        Some(transport.clone() as Arc<dyn MailTransport>),
        "reader@example.com".to_string(),
        None,
    );

    let coordinator = FetchCoordinator::new(4, Duration::from_secs(5), 1);
    let pipeline = Pipeline::new(
        store.clone(),
        adapters,
        coordinator,
        summarizer,
        indexer,
        ranker,
        mailer,
        UserProfile::default(),
        4,
        4,
    );

    Harness {
        pipeline,
        store,
        vectors,
        model,
        transport,
        embedder,
        _tmp: tmp,
    }
}

fn web_item(source: &str, guid: &str, title: &str, age_hours: i64) -> FetchedItem {
    FetchedItem::Web(WebItem::new(
        guid.to_string(),
        source.to_string(),
        title.to_string(),
        format!("https://{source}.example/{guid}"),
        format!("About {title}."),
        Utc::now() - ChronoDuration::hours(age_hours),
        Category::News,
    ))
}

fn video_item(channel: &str, id: &str, title: &str, age_hours: i64) -> FetchedItem {
    FetchedItem::Video(VideoItem::new(
        id.to_string(),
        title.to_string(),
        format!("https://video.example/watch?v={id}"),
        channel.to_string(),
        Utc::now() - ChronoDuration::hours(age_hours),
        format!("About {title}."),
    ))
}

fn options(window_hours: i64, top_n: usize, skip_email: bool) -> PipelineOptions {
    PipelineOptions {
        window_hours,
        top_n,
        skip_email,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cold_start_counts_flow_through() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        FakeAdapter::with_items(
            "alpha",
            vec![
                web_item("alpha", "a1", "A1", 1),
                web_item("alpha", "a2", "A2", 2),
                web_item("alpha", "a3", "A3", 3),
            ],
        ),
        FakeAdapter::with_items(
            "beta",
            vec![
                web_item("beta", "b1", "B1", 1),
                web_item("beta", "b2", "B2", 2),
            ],
        ),
    ];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["A1", "A2", "A3", "B1", "B2"]).await;

    let outcome = h
        .pipeline
        .execute(&options(24, 10, false), &CancelToken::never())
        .await
        .unwrap();

    let run = &outcome.run;
    assert_eq!(run.get_status().unwrap(), RunStatus::Completed);
    assert_eq!(run.scraped, 5);
    assert_eq!(run.new_items, 5);
    assert_eq!(run.summarized, 5);
    assert_eq!(run.indexed, 5);
    assert_eq!(run.ranked, 5); // top_n > |W| returns |W|
    assert_eq!(run.emailed, 5);
    assert_eq!(run.skipped, 0);

    assert_eq!(h.store.counts().await.unwrap().summaries, 5);
    assert_eq!(h.vectors.count(&MetadataFilter::default()).await, 5);
    assert_eq!(h.transport.count(), 1);
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items(
        "alpha",
        vec![web_item("alpha", "a1", "A1", 1), web_item("alpha", "a2", "A2", 2)],
    )];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["A1", "A2"]).await;

    let first = h
        .pipeline
        .execute(&options(24, 10, true), &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(first.run.new_items, 2);
    assert_eq!(first.run.summarized, 2);

    let second = h
        .pipeline
        .execute(&options(24, 10, true), &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(second.run.scraped, 2);
    assert_eq!(second.run.new_items, 0);
    assert_eq!(second.run.summarized, 0);

    // Same set of summaries and vector records as after the first run
    assert_eq!(h.store.counts().await.unwrap().summaries, 2);
    assert_eq!(h.vectors.count(&MetadataFilter::default()).await, 2);
}

#[tokio::test]
async fn duplicate_summary_suppressed() {
    // Pre-populate one summary plus its vector record
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items(
        "alpha",
        vec![web_item("alpha", "new-item", "Dup", 1)],
    )];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["Dup"]).await;

    let existing = SummaryRecord::new(
        ArticleKind::Web,
        "old-item".to_string(),
        "https://alpha.example/old-item".to_string(),
        "Digest Dup".to_string(),
        "Summary of Dup. Worth a look.".to_string(),
        "alpha".to_string(),
        Some(Category::News),
        Utc::now() - ChronoDuration::hours(2),
    );
    h.store.insert_summary(&existing).await.unwrap();
    let vector = h
        .embedder
        .embed(vec![existing.embedding_text()])
        .await
        .unwrap()
        .pop()
        .unwrap();
    h.vectors
        .upsert(VectorRecord {
            id: existing.record_id(),
            vector,
            meta: newsbrief::index::VectorMeta {
                article_kind: "web".to_string(),
                url: existing.url.clone(),
                title: existing.title.clone(),
                category: existing.category.clone(),
                published_at: existing.published_at,
                source_name: existing.source_name.clone(),
            },
        })
        .await
        .unwrap();

    let outcome = h
        .pipeline
        .execute(&options(24, 10, true), &CancelToken::never())
        .await
        .unwrap();

    // The new item summarized to identical text: persisted with duplicate_of,
    // vector count unchanged
    assert_eq!(outcome.run.get_status().unwrap(), RunStatus::Completed);
    assert_eq!(outcome.run.skipped, 1);
    let new_summary = h
        .store
        .get_summary(ArticleKind::Web, "new-item")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(new_summary.duplicate_of.as_deref(), Some("web:old-item"));
    assert_eq!(h.vectors.count(&MetadataFilter::default()).await, 1);
}

#[tokio::test]
async fn partial_adapter_failure_is_advisory() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        FakeAdapter::with_items(
            "alpha",
            vec![
                web_item("alpha", "a1", "A1", 1),
                web_item("alpha", "a2", "A2", 2),
                web_item("alpha", "a3", "A3", 3),
                web_item("alpha", "a4", "A4", 4),
            ],
        ),
        FakeAdapter::failing("beta", false),
    ];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["A1", "A2", "A3", "A4"]).await;

    let outcome = h
        .pipeline
        .execute(&options(24, 10, true), &CancelToken::never())
        .await
        .unwrap();

    let run = &outcome.run;
    assert_eq!(run.get_status().unwrap(), RunStatus::Completed);
    assert_eq!(run.failed_adapters(), vec!["beta".to_string()]);
    assert_eq!(run.scraped, 4);
    assert_eq!(run.summarized, 4);
    assert_eq!(run.indexed, 4);
    assert!(*run.failed_by_kind().get("fetch").unwrap() >= 1);
}

#[tokio::test]
async fn rate_limited_model_honors_retry_after() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items(
        "alpha",
        vec![web_item("alpha", "a1", "A1", 1)],
    )];
    let model = FakeModel::rate_limited(HashMap::new(), 2, Duration::from_millis(150));
    let h = harness(adapters, model, &["A1"]).await;

    let started = std::time::Instant::now();
    let outcome = h
        .pipeline
        .execute(&options(24, 10, true), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.run.get_status().unwrap(), RunStatus::Completed);
    assert_eq!(outcome.run.summarized, 1);
    // Two throttled attempts, each with a 150ms retry-after hint
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(h.model.summarize_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn skip_email_returns_rendered_html() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items(
        "alpha",
        vec![
            web_item("alpha", "a1", "A1", 1),
            web_item("alpha", "a2", "A2", 2),
            web_item("alpha", "a3", "A3", 3),
        ],
    )];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["A1", "A2", "A3"]).await;

    let outcome = h
        .pipeline
        .execute(&options(168, 3, true), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.run.emailed, 0);
    assert_eq!(h.transport.count(), 0);
    let html = outcome.rendered_html.expect("rendered digest");
    assert!(html.contains("Digest A1"));
}

#[tokio::test]
async fn reconciliation_restores_missing_vector_without_model_calls() {
    // Summary persisted, vector write lost (simulated crash), no new items
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items("alpha", vec![])];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["Lost"]).await;

    let orphan = SummaryRecord::new(
        ArticleKind::Web,
        "lost".to_string(),
        "https://alpha.example/lost".to_string(),
        "Digest Lost".to_string(),
        "Summary of Lost. Worth a look.".to_string(),
        "alpha".to_string(),
        Some(Category::News),
        Utc::now() - ChronoDuration::hours(1),
    );
    h.store.insert_summary(&orphan).await.unwrap();
    assert!(!h.vectors.contains("web:lost").await);

    let outcome = h
        .pipeline
        .execute(&options(24, 10, true), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.run.get_status().unwrap(), RunStatus::Completed);
    assert!(h.vectors.contains("web:lost").await);
    assert_eq!(outcome.run.indexed, 1);
    // The summary model was never re-invoked
    assert_eq!(h.model.summarize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ranking_orders_by_score_and_truncates() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items(
        "alpha",
        vec![
            web_item("alpha", "a1", "A1", 1),
            web_item("alpha", "a2", "A2", 2),
            web_item("alpha", "a3", "A3", 3),
        ],
    )];
    let scores = HashMap::from([
        ("Digest A1".to_string(), 3.0),
        ("Digest A2".to_string(), 9.0),
        ("Digest A3".to_string(), 6.0),
    ]);
    let model = FakeModel::new(scores);
    let h = harness(adapters, model, &["A1", "A2", "A3"]).await;

    let outcome = h
        .pipeline
        .execute(&options(24, 2, true), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.ranked.len(), 2);
    assert_eq!(outcome.ranked[0].title, "Digest A2");
    assert_eq!(outcome.ranked[0].rank, 1);
    assert_eq!(outcome.ranked[1].title, "Digest A3");
    assert!(outcome.ranked[0].score >= outcome.ranked[1].score);
}

#[tokio::test]
async fn empty_window_completes_with_zero_counts() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items(
        "alpha",
        vec![web_item("alpha", "old", "Old", 80)],
    )];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["Old"]).await;

    // Items published outside the window yield a successful empty run
    let outcome = h
        .pipeline
        .execute(&options(24, 10, true), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.run.get_status().unwrap(), RunStatus::Completed);
    assert_eq!(outcome.run.scraped, 0);
    assert_eq!(outcome.run.summarized, 0);
    assert_eq!(outcome.run.ranked, 0);
    assert!(outcome.rendered_html.is_none());
}

#[tokio::test]
async fn video_transcript_enrichment_flows_to_summary() {
    let adapter = FakeAdapter {
        name: "chan".to_string(),
        items: vec![video_item("chan", "v1", "Clip", 1)],
        failure: None,
        transcript: Some("Full transcript about Clip.".to_string()),
    };
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(adapter)];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["Clip"]).await;

    let outcome = h
        .pipeline
        .execute(&options(24, 10, true), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.run.summarized, 1);
    let video = h.store.recent_videos(1).await.unwrap().pop().unwrap();
    assert_eq!(video.transcript.as_deref(), Some("Full transcript about Clip."));
    let summary = h
        .store
        .get_summary(ArticleKind::Video, "v1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.title, "Digest Clip");
}

#[tokio::test]
async fn scrape_prefix_stops_before_digest() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items(
        "alpha",
        vec![web_item("alpha", "a1", "A1", 1)],
    )];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["A1"]).await;

    let outcome = h
        .pipeline
        .execute_through(&options(24, 10, true), Stage::Process, &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.run.get_status().unwrap(), RunStatus::Completed);
    assert_eq!(outcome.run.scraped, 1);
    assert_eq!(outcome.run.new_items, 1);
    // Digest never ran
    assert_eq!(outcome.run.summarized, 0);
    assert_eq!(h.model.summarize_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.counts().await.unwrap().summaries, 0);
}

#[tokio::test]
async fn cancelled_before_start_finishes_cancelled() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![FakeAdapter::with_items(
        "alpha",
        vec![web_item("alpha", "a1", "A1", 1)],
    )];
    let model = FakeModel::new(HashMap::new());
    let h = harness(adapters, model, &["A1"]).await;

    let (handle, cancel) = newsbrief::cancel_pair();
    handle.cancel();

    let outcome = h
        .pipeline
        .execute(&options(24, 10, true), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.run.get_status().unwrap(), RunStatus::Cancelled);
    assert_eq!(outcome.run.scraped, 0);
}
