//! Pipeline orchestration
//!
//! A six-stage state machine: Scrape, Process, Digest, Index, Rank, Email.
//! The transition table is data (`Stage::next`), the driver persists the run
//! record at every boundary, and failures follow one discipline throughout:
//! advisory failures are counted and the run continues; fatal failures (a
//! store failure on the run record itself, or a dead retrieval path in Rank)
//! move the run to `failed`. A cancel request takes effect at the next stage
//! boundary; in-flight units are bounded by their own timeouts.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::fetch::FetchCoordinator;
use crate::index::{EmbeddingIndexer, IndexOutcome};
use crate::llm::SummaryService;
use crate::mail::DigestMailer;
use crate::profile::UserProfile;
use crate::rank::{RankedItem, Ranker};
use crate::sources::{FetchedItem, SourceAdapter};
use crate::store::{PipelineRun, RecordStore, RunStatus, SummaryRecord};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scrape,
    Process,
    Digest,
    Index,
    Rank,
    Email,
}

impl Stage {
    /// Total order over the stages
    pub const ORDER: [Stage; 6] = [
        Stage::Scrape,
        Stage::Process,
        Stage::Digest,
        Stage::Index,
        Stage::Rank,
        Stage::Email,
    ];

    /// The stage after this one; `None` past Email
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Scrape => "scrape",
            Stage::Process => "process",
            Stage::Digest => "digest",
            Stage::Index => "index",
            Stage::Rank => "rank",
            Stage::Email => "email",
        }
    }
}

/// Parameters of one pipeline invocation
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub window_hours: i64,
    pub top_n: usize,
    pub skip_email: bool,
}

/// Result of one pipeline invocation
#[derive(Debug)]
pub struct RunOutcome {
    pub run: PipelineRun,
    pub ranked: Vec<RankedItem>,
    /// Rendered digest HTML (always present after Email in skip-email mode)
    pub rendered_html: Option<String>,
}

/// Mutable per-run state threaded through the stages
struct RunState {
    run: PipelineRun,
    since: DateTime<Utc>,
    failures: HashMap<String, u64>,
    failed_adapters: Vec<String>,
    ranked: Vec<RankedItem>,
    rendered_html: Option<String>,
}

impl RunState {
    fn record_failure(&mut self, kind: &str) {
        *self.failures.entry(kind.to_string()).or_insert(0) += 1;
    }

    fn sync_run(&mut self) {
        self.run.failed_json = serde_json::to_string(&self.failures).ok();
        self.run.failed_adapters_json = serde_json::to_string(&self.failed_adapters).ok();
    }
}

/// The orchestrator tying all components together
pub struct Pipeline {
    store: RecordStore,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    coordinator: FetchCoordinator,
    summarizer: SummaryService,
    indexer: EmbeddingIndexer,
    ranker: Ranker,
    mailer: DigestMailer,
    profile: UserProfile,
    llm_concurrency: usize,
    fetch_concurrency: usize,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: RecordStore,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        coordinator: FetchCoordinator,
        summarizer: SummaryService,
        indexer: EmbeddingIndexer,
        ranker: Ranker,
        mailer: DigestMailer,
        profile: UserProfile,
        llm_concurrency: usize,
        fetch_concurrency: usize,
    ) -> Self {
        Self {
            store,
            adapters,
            coordinator,
            summarizer,
            indexer,
            ranker,
            mailer,
            profile,
            llm_concurrency: llm_concurrency.max(1),
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Run the whole pipeline
    pub async fn execute(
        &self,
        options: &PipelineOptions,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        self.execute_through(options, Stage::Email, cancel).await
    }

    /// Run the stage graph up to and including `last_stage`.
    ///
    /// The scrape-only entrypoint uses the Scrape..Process prefix; everything
    /// else runs the full graph.
    pub async fn execute_through(
        &self,
        options: &PipelineOptions,
        last_stage: Stage,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let run = PipelineRun::new(options.window_hours, options.top_n);
        let since = run.started_at - Duration::hours(options.window_hours);
        info!(
            run_id = run.id.as_str(),
            window_hours = options.window_hours,
            top_n = options.top_n,
            "Pipeline starting"
        );

        // A failure to persist the run record itself is fatal
        self.store.create_run(&run).await?;

        let mut state = RunState {
            run,
            since,
            failures: HashMap::new(),
            failed_adapters: Vec::new(),
            ranked: Vec::new(),
            rendered_html: None,
        };

        let mut stage = Some(Stage::Scrape);
        while let Some(current) = stage {
            if cancel.is_cancelled() {
                return self.finish(state, RunStatus::Cancelled, None).await;
            }

            state.run.stage = current.as_str().to_string();
            state.sync_run();
            self.store.update_run(&state.run).await?;

            let result = match current {
                Stage::Scrape => self.stage_scrape(&mut state, cancel).await,
                Stage::Process => self.stage_process(&mut state, cancel).await,
                Stage::Digest => self.stage_digest(&mut state, cancel).await,
                Stage::Index => self.stage_index(&mut state, cancel).await,
                Stage::Rank => self.stage_rank(&mut state, cancel).await,
                Stage::Email => self.stage_email(options, &mut state, cancel).await,
            };

            match result {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    return self.finish(state, RunStatus::Cancelled, None).await;
                }
                Err(e) => {
                    warn!(stage = current.as_str(), "Fatal stage failure: {}", e);
                    return self.finish(state, RunStatus::Failed, Some(e)).await;
                }
            }

            stage = if current == last_stage {
                None
            } else {
                current.next()
            };
        }

        self.finish(state, RunStatus::Completed, None).await
    }

    async fn finish(
        &self,
        mut state: RunState,
        status: RunStatus,
        error: Option<Error>,
    ) -> Result<RunOutcome> {
        state.run.status = status.to_string();
        state.run.finished_at = Some(Utc::now());
        state.run.error = error.map(|e| e.to_string());
        state.sync_run();
        self.store.update_run(&state.run).await?;

        info!(
            run_id = state.run.id.as_str(),
            status = %status,
            scraped = state.run.scraped,
            new_items = state.run.new_items,
            summarized = state.run.summarized,
            indexed = state.run.indexed,
            ranked = state.run.ranked,
            emailed = state.run.emailed,
            "Pipeline finished"
        );

        Ok(RunOutcome {
            run: state.run,
            ranked: state.ranked,
            rendered_html: state.rendered_html,
        })
    }

    /// Scrape: fan out to the adapters and persist what came back
    async fn stage_scrape(&self, state: &mut RunState, cancel: &CancelToken) -> Result<()> {
        let now = Utc::now();
        let report = self
            .coordinator
            .fetch_all(&self.adapters, state.since, now, cancel)
            .await;

        state.run.scraped = report.items.len() as i64;
        for failure in &report.failed {
            state.record_failure("fetch");
            state.failed_adapters.push(failure.source.clone());
        }

        let mut videos = Vec::new();
        let mut web = Vec::new();
        for item in report.items {
            match item {
                FetchedItem::Video(v) => videos.push(v),
                FetchedItem::Web(w) => web.push(w),
            }
        }

        let mut new_items = 0u64;
        match self.store.upsert_videos(&videos).await {
            Ok(n) => new_items += n,
            Err(e) => {
                warn!("Video batch upsert failed: {}", e);
                state.record_failure("store");
            }
        }
        match self.store.upsert_web_items(&web).await {
            Ok(n) => new_items += n,
            Err(e) => {
                warn!("Web batch upsert failed: {}", e);
                state.record_failure("store");
            }
        }
        state.run.new_items = new_items as i64;
        Ok(())
    }

    /// Process: fill missing bodies through each owning adapter
    async fn stage_process(&self, state: &mut RunState, cancel: &CancelToken) -> Result<()> {
        let mut targets: Vec<FetchedItem> = Vec::new();
        for video in self.store.videos_missing_transcript(state.since).await? {
            targets.push(FetchedItem::Video(video));
        }
        for web in self.store.web_missing_content(state.since).await? {
            targets.push(FetchedItem::Web(web));
        }
        if targets.is_empty() {
            return Ok(());
        }

        let outcomes: Vec<std::result::Result<(), ()>> =
            stream::iter(targets.iter().map(|item| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return Err(());
                    }
                    let Some(adapter) = self.adapters.iter().find(|a| a.owns(item)) else {
                        // Catalog changed under stored items; nothing to do
                        return Ok(());
                    };
                    match adapter.enrich(item).await {
                        Ok(Some(body)) => {
                            let store_result = match item {
                                FetchedItem::Video(v) => {
                                    self.store.set_transcript(&v.video_id, &body).await
                                }
                                FetchedItem::Web(w) => {
                                    self.store.set_web_content(&w.guid, &body).await
                                }
                            };
                            store_result.map_err(|e| {
                                warn!("Enrichment persist failed: {}", e);
                            })
                        }
                        Ok(None) => Ok(()),
                        Err(e) => {
                            warn!("Enrichment failed: {}", e);
                            Err(())
                        }
                    }
                }
            }))
            .buffer_unordered(self.fetch_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            if outcome.is_err() {
                state.record_failure("fetch");
            }
        }
        Ok(())
    }

    /// Digest: summarize every in-window item without a summary
    async fn stage_digest(&self, state: &mut RunState, cancel: &CancelToken) -> Result<()> {
        let pending = self.store.pending_summaries(state.since).await?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(pending = pending.len(), "Digest stage starting");

        let outcomes: Vec<std::result::Result<SummaryRecord, ()>> =
            stream::iter(pending.iter().map(|article| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return Err(());
                    }
                    match self.summarizer.summarize(article, &cancel).await {
                        Ok(digest) => Ok(SummaryRecord::new(
                            article.kind,
                            article.article_id.clone(),
                            article.url.clone(),
                            digest.title,
                            digest.summary,
                            article.source_name.clone(),
                            article.category,
                            article.published_at,
                        )),
                        Err(e) => {
                            warn!(
                                article = article.record_id().as_str(),
                                "Summary failed: {}",
                                e
                            );
                            Err(())
                        }
                    }
                }
            }))
            .buffer_unordered(self.llm_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(summary) => match self.store.insert_summary(&summary).await {
                    Ok(()) => state.run.summarized += 1,
                    Err(e) => {
                        warn!("Summary persist failed: {}", e);
                        state.record_failure("store");
                    }
                },
                Err(()) => state.record_failure("model"),
            }
        }
        Ok(())
    }

    /// Index: reconcile crash leftovers, then index this window's summaries
    async fn stage_index(&self, state: &mut RunState, cancel: &CancelToken) -> Result<()> {
        match self
            .indexer
            .reconcile(state.since, state.run.started_at, cancel)
            .await
        {
            Ok(restored) => state.run.indexed += restored as i64,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!("Reconciliation failed: {}", e);
                state.record_failure("index");
            }
        }

        // Single-writer discipline: one summary at a time through the
        // in-process embedder
        let summaries = self.store.rankable_summaries(state.since).await?;
        for summary in summaries {
            cancel.check()?;
            match self.indexer.index_summary(&summary).await {
                Ok(IndexOutcome::Inserted) => state.run.indexed += 1,
                Ok(IndexOutcome::Duplicate(_)) => state.run.skipped += 1,
                Ok(IndexOutcome::AlreadyIndexed) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(
                        summary = summary.record_id().as_str(),
                        "Indexing failed: {}",
                        e
                    );
                    state.record_failure("index");
                }
            }
        }
        Ok(())
    }

    /// Rank: score the window against the profile
    async fn stage_rank(&self, state: &mut RunState, cancel: &CancelToken) -> Result<()> {
        let candidates = self.store.rankable_summaries(state.since).await?;
        let report = self
            .ranker
            .rank(candidates, state.run.top_n as usize, cancel)
            .await?;

        state.run.ranked = report.items.len() as i64;
        for _ in 0..report.degraded {
            state.record_failure("ranking_degraded");
        }
        state.ranked = report.items;
        Ok(())
    }

    /// Email: compose and deliver, or render only in skip-email mode
    async fn stage_email(
        &self,
        options: &PipelineOptions,
        state: &mut RunState,
        cancel: &CancelToken,
    ) -> Result<()> {
        if state.ranked.is_empty() {
            info!("Nothing ranked; skipping digest delivery");
            return Ok(());
        }

        match self
            .mailer
            .deliver(
                &self.profile,
                &state.ranked,
                None,
                None,
                options.skip_email,
                cancel,
            )
            .await
        {
            Ok(delivery) => {
                if delivery.sent {
                    state.run.emailed = state.ranked.len() as i64;
                }
                state.rendered_html = Some(delivery.html);
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!("Digest delivery failed: {}", e);
                state.record_failure("transport");
            }
        }
        Ok(())
    }
}

/// Outcome of an on-demand digest send
#[derive(Debug, Clone)]
pub struct DigestSendReport {
    pub sent_at: DateTime<Utc>,
    pub count: usize,
    pub recipient: Option<String>,
}

impl Pipeline {
    /// Rank the already-summarized window and email it, without scraping.
    ///
    /// Backs the on-demand send entrypoint: an external trigger can mail the
    /// current window immediately from existing summaries.
    pub async fn send_existing_digest(
        &self,
        window_hours: i64,
        top_n: usize,
        recipient: Option<&str>,
        subject: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<DigestSendReport> {
        let since = Utc::now() - Duration::hours(window_hours);
        let candidates = self.store.rankable_summaries(since).await?;
        if candidates.is_empty() {
            return Err(Error::NotFound(format!(
                "no summaries in the last {} hours; run the pipeline first",
                window_hours
            )));
        }

        let report = self.ranker.rank(candidates, top_n, cancel).await?;
        self.mailer
            .deliver(&self.profile, &report.items, recipient, subject, false, cancel)
            .await?;

        Ok(DigestSendReport {
            sent_at: Utc::now(),
            count: report.items.len(),
            recipient: recipient.map(|r| r.to_string()),
        })
    }
}
