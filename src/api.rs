//! Request plane
//!
//! Transport-agnostic entrypoints over the wired components: the CLI calls
//! these, and any future HTTP surface would too. Long-running operations
//! return the finished run record; list and stats calls are synchronous
//! reads.

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::crawl::build_http_client;
use crate::embed::create_embedder;
use crate::error::{Error, Result};
use crate::fetch::FetchCoordinator;
use crate::index::{EmbeddingIndexer, MetadataFilter, SearchHit, VectorStore};
use crate::llm::{HttpModelEndpoint, IntroService, ModelClient, ScoreService, SummaryService};
use crate::mail::{DigestMailer, MailTransport, SmtpMailer};
use crate::pipeline::{DigestSendReport, Pipeline, PipelineOptions, RunOutcome, Stage};
use crate::rank::Ranker;
use crate::retrieve::SemanticRetriever;
use crate::sources::build_adapters;
use crate::store::{
    ArticleKind, Category, PipelineRun, RecordStore, StoreCounts, SummaryRecord, VideoItem,
    WebItem,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

/// Predicates accepted by the search entrypoint
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub kind: Option<ArticleKind>,
    pub category: Option<Category>,
}

impl SearchFilter {
    fn to_metadata_filter(&self) -> MetadataFilter {
        MetadataFilter {
            article_kind: self.kind.map(|k| k.to_string()),
            category: self.category.map(|c| c.to_string()),
        }
    }
}

/// One page of summaries
#[derive(Debug)]
pub struct SummaryPage {
    pub items: Vec<SummaryRecord>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// Aggregate system state for the stats entrypoint
#[derive(Debug)]
pub struct Stats {
    pub counts: StoreCounts,
    pub indexed: usize,
    pub last_run: Option<PipelineRun>,
}

/// Items returned by the item listing entrypoint
#[derive(Debug)]
pub enum ItemList {
    Videos(Vec<VideoItem>),
    Web(Vec<WebItem>),
}

/// The wired application
pub struct App {
    config: Config,
    store: RecordStore,
    retriever: SemanticRetriever,
    pipeline: Pipeline,
}

impl App {
    /// Wire every component from configuration
    pub async fn init(config: Config) -> Result<Self> {
        config.validate()?;

        let store = RecordStore::connect(&config.store, config.db_pool_size()).await?;
        store.init_schema().await?;

        let fetch_client = build_http_client(
            &crate::config::default_user_agent(),
            Duration::from_secs(config.timeouts.fetch_secs),
        )?;
        let adapters = build_adapters(&config, fetch_client)?;
        let coordinator = FetchCoordinator::new(
            config.pools.fetch,
            Duration::from_secs(config.timeouts.fetch_secs),
            config.retries.fetch,
        );

        let embedder = create_embedder(&config.embedding)?;
        let vectors = Arc::new(
            VectorStore::open(
                &config.index.dir,
                &config.index.collection,
                config.embedding.dimension,
            )
            .await?,
        );
        let indexer = EmbeddingIndexer::new(
            embedder.clone(),
            vectors.clone(),
            store.clone(),
            config.index.dup_threshold,
            config.embedding.batch_size,
        );
        let retriever = SemanticRetriever::new(embedder, vectors);

        let model_http = build_http_client(
            &crate::config::default_user_agent(),
            Duration::from_secs(config.timeouts.llm_secs + 5),
        )?;
        let endpoint = Arc::new(HttpModelEndpoint::new(
            model_http,
            config.model.endpoint.clone(),
            config.model.api_key()?,
        ));
        let llm_permits = Arc::new(Semaphore::new(config.pools.llm));
        let model_client = ModelClient::new(
            endpoint,
            llm_permits,
            Duration::from_secs(config.timeouts.llm_secs),
            config.retries.model.max(1),
        );

        let summarizer = SummaryService::new(
            model_client.clone(),
            config.model.digest_model.clone(),
            config.model.digest_temperature,
            config.model.max_tokens,
            config.digest.summary_input_budget,
            config.retries.parse,
        );
        let scorer = ScoreService::new(
            model_client.clone(),
            config.model.rank_model.clone(),
            config.model.rank_temperature,
            config.model.max_tokens,
        );
        let intro = IntroService::new(
            model_client,
            config.model.email_model.clone(),
            config.model.email_temperature,
            config.model.max_tokens,
        );

        let ranker = Ranker::new(
            retriever.clone(),
            scorer,
            store.clone(),
            config.profile.clone(),
            config.index.context_k,
            config.pools.llm,
        );

        let transport: Option<Arc<dyn MailTransport>> = match SmtpMailer::new(&config.mail) {
            Ok(mailer) => Some(Arc::new(mailer)),
            Err(e) => {
                warn!("Mail transport unavailable ({}); digests render only", e);
                None
            }
        };
        let mailer = DigestMailer::new(
            intro,
            transport,
            config.mail.recipient.clone(),
            config.mail.subject.clone(),
        );

        let pipeline = Pipeline::new(
            store.clone(),
            adapters,
            coordinator,
            summarizer,
            indexer,
            ranker,
            mailer,
            config.profile.clone(),
            config.pools.llm,
            config.pools.fetch,
        );

        Ok(Self {
            config,
            store,
            retriever,
            pipeline,
        })
    }

    /// Assemble from pre-built parts (tests, embedded use)
    pub fn from_parts(
        config: Config,
        store: RecordStore,
        retriever: SemanticRetriever,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            config,
            store,
            retriever,
            pipeline,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the whole pipeline
    pub async fn run(
        &self,
        window_hours: Option<i64>,
        top_n: Option<usize>,
        skip_email: Option<bool>,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let options = PipelineOptions {
            window_hours: window_hours.unwrap_or(self.config.digest.window_hours),
            top_n: top_n.unwrap_or(self.config.digest.top_n),
            skip_email: skip_email.unwrap_or(self.config.digest.skip_email),
        };
        self.pipeline.execute(&options, cancel).await
    }

    /// Harvest and enrich only (Scrape + Process prefix)
    pub async fn scrape(
        &self,
        window_hours: Option<i64>,
        cancel: &CancelToken,
    ) -> Result<PipelineRun> {
        let options = PipelineOptions {
            window_hours: window_hours.unwrap_or(self.config.digest.window_hours),
            top_n: self.config.digest.top_n,
            skip_email: true,
        };
        let outcome = self
            .pipeline
            .execute_through(&options, Stage::Process, cancel)
            .await?;
        Ok(outcome.run)
    }

    /// Email the current window's summaries immediately
    pub async fn send_digest(
        &self,
        window_hours: Option<i64>,
        top_n: Option<usize>,
        recipient: Option<&str>,
        subject: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<DigestSendReport> {
        self.pipeline
            .send_existing_digest(
                window_hours.unwrap_or(self.config.digest.window_hours),
                top_n.unwrap_or(self.config.digest.top_n),
                recipient,
                subject,
                cancel,
            )
            .await
    }

    /// Semantic search over indexed summaries
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(Error::Config("empty search query".to_string()));
        }
        self.retriever
            .search(query, k, &filter.to_metadata_filter())
            .await
    }

    /// Page through summaries in the window
    pub async fn list_summaries(
        &self,
        window_hours: Option<i64>,
        page: u64,
        page_size: u64,
    ) -> Result<SummaryPage> {
        let hours = window_hours.unwrap_or(self.config.digest.window_hours);
        let since = Utc::now() - ChronoDuration::hours(hours);
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let (items, total) = self.store.summaries_page(since, page, page_size).await?;
        Ok(SummaryPage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Aggregate counts and the latest run
    pub async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            counts: self.store.counts().await?,
            indexed: self.retriever.indexed_count().await,
            last_run: self.store.last_run().await?,
        })
    }

    /// Most recent items of one kind
    pub async fn get_items(&self, kind: ArticleKind, limit: i64) -> Result<ItemList> {
        let limit = limit.clamp(1, 500);
        match kind {
            ArticleKind::Video => Ok(ItemList::Videos(self.store.recent_videos(limit).await?)),
            ArticleKind::Web => Ok(ItemList::Web(self.store.recent_web_items(limit).await?)),
        }
    }
}
