//! Record storage using SQLite
//!
//! This module is the source of truth for all durable records:
//! - Video and web items harvested from sources
//! - Summaries produced by the model
//! - Pipeline run records with per-stage counters
//!
//! The vector index is a derived view over summaries and is rebuilt from
//! here when the two drift apart.

mod schema;

pub use schema::*;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Article kinds; one per item table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleKind {
    Video,
    Web,
}

impl std::fmt::Display for ArticleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArticleKind::Video => write!(f, "video"),
            ArticleKind::Web => write!(f, "web"),
        }
    }
}

impl FromStr for ArticleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "video" => Ok(ArticleKind::Video),
            "web" => Ok(ArticleKind::Web),
            _ => Err(Error::Config(format!("Unknown article kind: {}", s))),
        }
    }
}

/// Web source categories, assigned by source configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Official,
    Research,
    News,
    Safety,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Official => write!(f, "official"),
            Category::Research => write!(f, "research"),
            Category::News => write!(f, "news"),
            Category::Safety => write!(f, "safety"),
        }
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "official" => Ok(Category::Official),
            "research" => Ok(Category::Research),
            "news" => Ok(Category::News),
            "safety" => Ok(Category::Safety),
            _ => Err(Error::Config(format!("Unknown category: {}", s))),
        }
    }
}

/// Pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(Error::Config(format!("Unknown run status: {}", s))),
        }
    }
}

/// A video item from a channel feed
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VideoItem {
    pub video_id: String,
    pub title: String,
    pub url: String,
    pub channel_id: String,
    pub published_at: DateTime<Utc>,
    pub description: String,
    pub transcript: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VideoItem {
    pub fn new(
        video_id: String,
        title: String,
        url: String,
        channel_id: String,
        published_at: DateTime<Utc>,
        description: String,
    ) -> Self {
        Self {
            video_id,
            title,
            url,
            channel_id,
            published_at,
            description,
            transcript: None,
            created_at: Utc::now(),
        }
    }

    pub fn record_id(&self) -> String {
        format!("{}:{}", ArticleKind::Video, self.video_id)
    }
}

/// A web item from a syndication feed or rendered page
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebItem {
    pub guid: String,
    pub source_name: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub category: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guid: String,
        source_name: String,
        title: String,
        url: String,
        description: String,
        published_at: DateTime<Utc>,
        category: Category,
    ) -> Self {
        Self {
            guid,
            source_name,
            title,
            url,
            description,
            published_at,
            category: category.to_string(),
            content: None,
            created_at: Utc::now(),
        }
    }

    pub fn record_id(&self) -> String {
        format!("{}:{}", ArticleKind::Web, self.guid)
    }

    pub fn get_category(&self) -> Result<Category> {
        self.category.parse()
    }
}

/// A model-produced summary keyed by `(article_kind, article_id)`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: String,
    pub article_kind: String,
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub source_name: String,
    pub category: Option<String>,
    pub published_at: DateTime<Utc>,
    pub duplicate_of: Option<String>,
    pub ranking_degraded: bool,
    pub created_at: DateTime<Utc>,
}

impl SummaryRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ArticleKind,
        article_id: String,
        url: String,
        title: String,
        summary: String,
        source_name: String,
        category: Option<Category>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            article_kind: kind.to_string(),
            article_id,
            url,
            title,
            summary,
            source_name,
            category: category.map(|c| c.to_string()),
            published_at,
            duplicate_of: None,
            ranking_degraded: false,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> Result<ArticleKind> {
        self.article_kind.parse()
    }

    /// Stable id shared with the vector index: `<kind>:<article_id>`
    pub fn record_id(&self) -> String {
        format!("{}:{}", self.article_kind, self.article_id)
    }

    /// Text the embedding is computed over
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.title, self.summary)
    }
}

/// An item in the window that still lacks a summary
#[derive(Debug, Clone)]
pub struct PendingArticle {
    pub kind: ArticleKind,
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub source_name: String,
    pub category: Option<Category>,
    pub published_at: DateTime<Utc>,
    /// Transcript for videos, description + content for web items
    pub body: String,
}

impl PendingArticle {
    pub fn record_id(&self) -> String {
        format!("{}:{}", self.kind, self.article_id)
    }
}

/// A pipeline run record with per-stage counters
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub window_hours: i64,
    pub top_n: i64,
    pub stage: String,
    pub scraped: i64,
    pub new_items: i64,
    pub summarized: i64,
    pub indexed: i64,
    pub ranked: i64,
    pub emailed: i64,
    pub skipped: i64,
    pub failed_json: Option<String>,
    pub failed_adapters_json: Option<String>,
    pub status: String,
    pub error: Option<String>,
}

impl PipelineRun {
    pub fn new(window_hours: i64, top_n: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            window_hours,
            top_n: top_n as i64,
            stage: "scrape".to_string(),
            scraped: 0,
            new_items: 0,
            summarized: 0,
            indexed: 0,
            ranked: 0,
            emailed: 0,
            skipped: 0,
            failed_json: None,
            failed_adapters_json: None,
            status: RunStatus::Running.to_string(),
            error: None,
        }
    }

    pub fn get_status(&self) -> Result<RunStatus> {
        self.status.parse()
    }

    /// Advisory failure counts keyed by error kind
    pub fn failed_by_kind(&self) -> std::collections::HashMap<String, u64> {
        self.failed_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }

    /// Adapters that exhausted their retry budget this run
    pub fn failed_adapters(&self) -> Vec<String> {
        self.failed_adapters_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Aggregate counts for the stats surface
#[derive(Debug, Clone, Serialize)]
pub struct StoreCounts {
    pub videos: u64,
    pub web_items: u64,
    pub summaries: u64,
    pub duplicates: u64,
}

/// Record store handle
#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    /// Connect to the record store database
    pub async fn connect(config: &StoreConfig, pool_size: u32) -> Result<Self> {
        let db_path = &config.db_file;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(5))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing record store schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    // ===== Video items =====

    /// Upsert a batch of video items; returns how many were new.
    ///
    /// On key collision the original `created_at` and `published_at` are kept;
    /// title and description update only when the incoming value is non-empty,
    /// and a transcript, once present, is never overwritten.
    pub async fn upsert_videos(&self, items: &[VideoItem]) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut new_count = 0u64;

        for item in items {
            let exists: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM items_video WHERE video_id = ?")
                    .bind(&item.video_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_none() {
                new_count += 1;
            }

            sqlx::query(
                r#"
                INSERT INTO items_video
                    (video_id, title, url, channel_id, published_at, description, transcript, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(video_id) DO UPDATE SET
                    title = CASE WHEN excluded.title <> '' THEN excluded.title ELSE items_video.title END,
                    description = CASE WHEN excluded.description <> '' THEN excluded.description ELSE items_video.description END,
                    transcript = COALESCE(NULLIF(items_video.transcript, ''), NULLIF(excluded.transcript, ''))
                "#,
            )
            .bind(&item.video_id)
            .bind(&item.title)
            .bind(&item.url)
            .bind(&item.channel_id)
            .bind(item.published_at)
            .bind(&item.description)
            .bind(&item.transcript)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Upserted {} video items ({} new)", items.len(), new_count);
        Ok(new_count)
    }

    /// Video items published within the window
    pub async fn videos_in_window(&self, since: DateTime<Utc>) -> Result<Vec<VideoItem>> {
        let items = sqlx::query_as::<_, VideoItem>(
            "SELECT * FROM items_video WHERE published_at >= ? ORDER BY published_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Most recently published video items
    pub async fn recent_videos(&self, limit: i64) -> Result<Vec<VideoItem>> {
        let items = sqlx::query_as::<_, VideoItem>(
            "SELECT * FROM items_video ORDER BY published_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Video items in the window without a transcript
    pub async fn videos_missing_transcript(&self, since: DateTime<Utc>) -> Result<Vec<VideoItem>> {
        let items = sqlx::query_as::<_, VideoItem>(
            r#"
            SELECT * FROM items_video
            WHERE published_at >= ? AND (transcript IS NULL OR transcript = '')
            ORDER BY published_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Attach a transcript to a video item (no-op when one is already present)
    pub async fn set_transcript(&self, video_id: &str, transcript: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE items_video SET transcript = ?
            WHERE video_id = ? AND (transcript IS NULL OR transcript = '')
            "#,
        )
        .bind(transcript)
        .bind(video_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===== Web items =====

    /// Upsert a batch of web items; returns how many were new.
    pub async fn upsert_web_items(&self, items: &[WebItem]) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut new_count = 0u64;

        for item in items {
            let exists: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM items_web WHERE guid = ?")
                .bind(&item.guid)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                new_count += 1;
            }

            sqlx::query(
                r#"
                INSERT INTO items_web
                    (guid, source_name, title, url, description, published_at, category, content, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(guid) DO UPDATE SET
                    title = CASE WHEN excluded.title <> '' THEN excluded.title ELSE items_web.title END,
                    description = CASE WHEN excluded.description <> '' THEN excluded.description ELSE items_web.description END,
                    content = CASE WHEN excluded.content IS NOT NULL AND excluded.content <> ''
                              THEN excluded.content ELSE items_web.content END
                "#,
            )
            .bind(&item.guid)
            .bind(&item.source_name)
            .bind(&item.title)
            .bind(&item.url)
            .bind(&item.description)
            .bind(item.published_at)
            .bind(&item.category)
            .bind(&item.content)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Upserted {} web items ({} new)", items.len(), new_count);
        Ok(new_count)
    }

    /// Web items published within the window
    pub async fn web_in_window(&self, since: DateTime<Utc>) -> Result<Vec<WebItem>> {
        let items = sqlx::query_as::<_, WebItem>(
            "SELECT * FROM items_web WHERE published_at >= ? ORDER BY published_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Most recently published web items
    pub async fn recent_web_items(&self, limit: i64) -> Result<Vec<WebItem>> {
        let items = sqlx::query_as::<_, WebItem>(
            "SELECT * FROM items_web ORDER BY published_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Web items in the window without extracted content
    pub async fn web_missing_content(&self, since: DateTime<Utc>) -> Result<Vec<WebItem>> {
        let items = sqlx::query_as::<_, WebItem>(
            r#"
            SELECT * FROM items_web
            WHERE published_at >= ? AND (content IS NULL OR content = '')
            ORDER BY published_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Attach extracted content to a web item when it has none
    pub async fn set_web_content(&self, guid: &str, content: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE items_web SET content = ?
            WHERE guid = ? AND (content IS NULL OR content = '')
            "#,
        )
        .bind(content)
        .bind(guid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===== Summaries =====

    /// Items in the window that have no summary yet
    pub async fn pending_summaries(&self, since: DateTime<Utc>) -> Result<Vec<PendingArticle>> {
        let mut pending = Vec::new();

        let videos = sqlx::query_as::<_, VideoItem>(
            r#"
            SELECT v.* FROM items_video v
            LEFT JOIN summaries s ON s.article_kind = 'video' AND s.article_id = v.video_id
            WHERE v.published_at >= ? AND s.id IS NULL
            ORDER BY v.published_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        for v in videos {
            let body = match v.transcript.as_deref() {
                Some(t) if !t.is_empty() => t.to_string(),
                _ => v.description.clone(),
            };
            pending.push(PendingArticle {
                kind: ArticleKind::Video,
                article_id: v.video_id,
                url: v.url,
                title: v.title,
                source_name: v.channel_id,
                category: None,
                published_at: v.published_at,
                body,
            });
        }

        let web = sqlx::query_as::<_, WebItem>(
            r#"
            SELECT w.* FROM items_web w
            LEFT JOIN summaries s ON s.article_kind = 'web' AND s.article_id = w.guid
            WHERE w.published_at >= ? AND s.id IS NULL
            ORDER BY w.published_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        for w in web {
            let mut body = w.description.clone();
            if let Some(content) = w.content.as_deref() {
                if !content.is_empty() {
                    body.push('\n');
                    body.push_str(content);
                }
            }
            let category = w.get_category().ok();
            pending.push(PendingArticle {
                kind: ArticleKind::Web,
                article_id: w.guid,
                url: w.url,
                title: w.title,
                source_name: w.source_name,
                category,
                published_at: w.published_at,
                body,
            });
        }

        Ok(pending)
    }

    /// Insert a summary; the `(article_kind, article_id)` key is unique, so a
    /// second insert for the same item is a no-op.
    pub async fn insert_summary(&self, summary: &SummaryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summaries
                (id, article_kind, article_id, url, title, summary, source_name,
                 category, published_at, duplicate_of, ranking_degraded, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(article_kind, article_id) DO NOTHING
            "#,
        )
        .bind(&summary.id)
        .bind(&summary.article_kind)
        .bind(&summary.article_id)
        .bind(&summary.url)
        .bind(&summary.title)
        .bind(&summary.summary)
        .bind(&summary.source_name)
        .bind(&summary.category)
        .bind(summary.published_at)
        .bind(&summary.duplicate_of)
        .bind(summary.ranking_degraded)
        .bind(summary.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a summary by its source item
    pub async fn get_summary(
        &self,
        kind: ArticleKind,
        article_id: &str,
    ) -> Result<Option<SummaryRecord>> {
        let summary = sqlx::query_as::<_, SummaryRecord>(
            "SELECT * FROM summaries WHERE article_kind = ? AND article_id = ?",
        )
        .bind(kind.to_string())
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(summary)
    }

    /// All summaries whose item published within the window
    pub async fn summaries_in_window(&self, since: DateTime<Utc>) -> Result<Vec<SummaryRecord>> {
        let summaries = sqlx::query_as::<_, SummaryRecord>(
            "SELECT * FROM summaries WHERE published_at >= ? ORDER BY published_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    /// Ranking candidates: in-window summaries that are not duplicates
    pub async fn rankable_summaries(&self, since: DateTime<Utc>) -> Result<Vec<SummaryRecord>> {
        let summaries = sqlx::query_as::<_, SummaryRecord>(
            r#"
            SELECT * FROM summaries
            WHERE published_at >= ? AND duplicate_of IS NULL
            ORDER BY published_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    /// One page of in-window summaries plus the total count
    pub async fn summaries_page(
        &self,
        since: DateTime<Utc>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<SummaryRecord>, u64)> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM summaries WHERE published_at >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;

        let offset = page.saturating_sub(1) * page_size;
        let summaries = sqlx::query_as::<_, SummaryRecord>(
            r#"
            SELECT * FROM summaries WHERE published_at >= ?
            ORDER BY published_at DESC LIMIT ? OFFSET ?
            "#,
        )
        .bind(since)
        .bind(page_size as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok((summaries, total as u64))
    }

    /// Mark a summary as a near-duplicate of an existing vector record
    pub async fn mark_duplicate(
        &self,
        kind: ArticleKind,
        article_id: &str,
        duplicate_of: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE summaries SET duplicate_of = ? WHERE article_kind = ? AND article_id = ?",
        )
        .bind(duplicate_of)
        .bind(kind.to_string())
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that ranking fell back to a neutral score for this summary
    pub async fn mark_ranking_degraded(&self, kind: ArticleKind, article_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE summaries SET ranking_degraded = 1 WHERE article_kind = ? AND article_id = ?",
        )
        .bind(kind.to_string())
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===== Runs =====

    /// Persist a freshly started run
    pub async fn create_run(&self, run: &PipelineRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs
                (id, started_at, finished_at, window_hours, top_n, stage,
                 scraped, new_items, summarized, indexed, ranked, emailed, skipped,
                 failed_json, failed_adapters_json, status, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.window_hours)
        .bind(run.top_n)
        .bind(&run.stage)
        .bind(run.scraped)
        .bind(run.new_items)
        .bind(run.summarized)
        .bind(run.indexed)
        .bind(run.ranked)
        .bind(run.emailed)
        .bind(run.skipped)
        .bind(&run.failed_json)
        .bind(&run.failed_adapters_json)
        .bind(&run.status)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the current counters and stage of a run
    pub async fn update_run(&self, run: &PipelineRun) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs SET
                finished_at = ?, stage = ?, scraped = ?, new_items = ?, summarized = ?,
                indexed = ?, ranked = ?, emailed = ?, skipped = ?,
                failed_json = ?, failed_adapters_json = ?, status = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(run.finished_at)
        .bind(&run.stage)
        .bind(run.scraped)
        .bind(run.new_items)
        .bind(run.summarized)
        .bind(run.indexed)
        .bind(run.ranked)
        .bind(run.emailed)
        .bind(run.skipped)
        .bind(&run.failed_json)
        .bind(&run.failed_adapters_json)
        .bind(&run.status)
        .bind(&run.error)
        .bind(&run.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a run by id
    pub async fn get_run(&self, id: &str) -> Result<Option<PipelineRun>> {
        let run = sqlx::query_as::<_, PipelineRun>("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    /// Most recently started run
    pub async fn last_run(&self) -> Result<Option<PipelineRun>> {
        let run = sqlx::query_as::<_, PipelineRun>(
            "SELECT * FROM runs ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    // ===== Stats =====

    /// Aggregate record counts
    pub async fn counts(&self) -> Result<StoreCounts> {
        let (videos,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items_video")
            .fetch_one(&self.pool)
            .await?;
        let (web_items,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items_web")
            .fetch_one(&self.pool)
            .await?;
        let (summaries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM summaries")
            .fetch_one(&self.pool)
            .await?;
        let (duplicates,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM summaries WHERE duplicate_of IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreCounts {
            videos: videos as u64,
            web_items: web_items as u64,
            summaries: summaries as u64,
            duplicates: duplicates as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn setup_test_store() -> (RecordStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            db_file: tmp.path().join("test.db"),
        };
        let store = RecordStore::connect(&config, 5).await.unwrap();
        store.init_schema().await.unwrap();
        (store, tmp)
    }

    fn video(id: &str, published_at: DateTime<Utc>) -> VideoItem {
        VideoItem::new(
            id.to_string(),
            format!("Video {}", id),
            format!("https://video.example/watch?v={}", id),
            "chan-1".to_string(),
            published_at,
            "a description".to_string(),
        )
    }

    fn web(guid: &str, published_at: DateTime<Utc>) -> WebItem {
        WebItem::new(
            guid.to_string(),
            "Example Blog".to_string(),
            format!("Post {}", guid),
            format!("https://blog.example/{}", guid),
            "a description".to_string(),
            published_at,
            Category::News,
        )
    }

    #[tokio::test]
    async fn test_upsert_videos_idempotent() {
        let (store, _tmp) = setup_test_store().await;
        let items = vec![video("a", Utc::now()), video("b", Utc::now())];

        let new1 = store.upsert_videos(&items).await.unwrap();
        assert_eq!(new1, 2);

        // Second identical upsert inserts nothing
        let new2 = store.upsert_videos(&items).await.unwrap();
        assert_eq!(new2, 0);
        assert_eq!(store.counts().await.unwrap().videos, 2);
    }

    #[tokio::test]
    async fn test_upsert_preserves_created_at_and_transcript() {
        let (store, _tmp) = setup_test_store().await;
        let mut item = video("a", Utc::now());
        store.upsert_videos(&[item.clone()]).await.unwrap();
        store.set_transcript("a", "the transcript").await.unwrap();

        let original = store.recent_videos(1).await.unwrap().pop().unwrap();

        // Re-upsert with an empty title and no transcript; both survive
        item.title = String::new();
        item.transcript = None;
        item.created_at = Utc::now() + Duration::hours(1);
        store.upsert_videos(&[item]).await.unwrap();

        let loaded = store.recent_videos(1).await.unwrap().pop().unwrap();
        assert_eq!(loaded.title, "Video a");
        assert_eq!(loaded.transcript.as_deref(), Some("the transcript"));
        assert_eq!(loaded.created_at, original.created_at);
    }

    #[tokio::test]
    async fn test_transcript_immutable_once_set() {
        let (store, _tmp) = setup_test_store().await;
        store.upsert_videos(&[video("a", Utc::now())]).await.unwrap();

        store.set_transcript("a", "first").await.unwrap();
        store.set_transcript("a", "second").await.unwrap();

        let loaded = store.recent_videos(1).await.unwrap().pop().unwrap();
        assert_eq!(loaded.transcript.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_web_content_enrichment() {
        let (store, _tmp) = setup_test_store().await;
        let mut item = web("g1", Utc::now());
        store.upsert_web_items(&[item.clone()]).await.unwrap();

        // Later pass fills content
        item.content = Some("full markdown".to_string());
        let new_count = store.upsert_web_items(&[item]).await.unwrap();
        assert_eq!(new_count, 0);

        let loaded = store.recent_web_items(1).await.unwrap().pop().unwrap();
        assert_eq!(loaded.content.as_deref(), Some("full markdown"));
    }

    #[tokio::test]
    async fn test_window_queries() {
        let (store, _tmp) = setup_test_store().await;
        let now = Utc::now();
        let items = vec![
            web("fresh", now - Duration::hours(1)),
            web("stale", now - Duration::hours(48)),
        ];
        store.upsert_web_items(&items).await.unwrap();

        let windowed = store.web_in_window(now - Duration::hours(24)).await.unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].guid, "fresh");
    }

    #[tokio::test]
    async fn test_pending_summaries_and_insert() {
        let (store, _tmp) = setup_test_store().await;
        let now = Utc::now();
        store.upsert_videos(&[video("v1", now)]).await.unwrap();
        store.upsert_web_items(&[web("w1", now)]).await.unwrap();

        let since = now - Duration::hours(24);
        let pending = store.pending_summaries(since).await.unwrap();
        assert_eq!(pending.len(), 2);

        let target = pending
            .iter()
            .find(|p| p.kind == ArticleKind::Web)
            .unwrap();
        let summary = SummaryRecord::new(
            target.kind,
            target.article_id.clone(),
            target.url.clone(),
            "A title".to_string(),
            "A short summary.".to_string(),
            target.source_name.clone(),
            target.category,
            target.published_at,
        );
        store.insert_summary(&summary).await.unwrap();

        let pending = store.pending_summaries(since).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, ArticleKind::Video);

        // Duplicate insert for the same item is a no-op
        store.insert_summary(&summary).await.unwrap();
        assert_eq!(store.counts().await.unwrap().summaries, 1);
    }

    #[tokio::test]
    async fn test_duplicate_marking_excludes_from_ranking() {
        let (store, _tmp) = setup_test_store().await;
        let now = Utc::now();
        store.upsert_web_items(&[web("w1", now)]).await.unwrap();

        let summary = SummaryRecord::new(
            ArticleKind::Web,
            "w1".to_string(),
            "https://blog.example/w1".to_string(),
            "T".to_string(),
            "S".to_string(),
            "Example Blog".to_string(),
            Some(Category::News),
            now,
        );
        store.insert_summary(&summary).await.unwrap();

        let since = now - Duration::hours(24);
        assert_eq!(store.rankable_summaries(since).await.unwrap().len(), 1);

        store
            .mark_duplicate(ArticleKind::Web, "w1", "web:w0")
            .await
            .unwrap();
        assert_eq!(store.rankable_summaries(since).await.unwrap().len(), 0);
        assert_eq!(store.summaries_in_window(since).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let (store, _tmp) = setup_test_store().await;
        let mut run = PipelineRun::new(24, 10);
        store.create_run(&run).await.unwrap();

        run.scraped = 5;
        run.stage = "digest".to_string();
        store.update_run(&run).await.unwrap();

        run.status = RunStatus::Completed.to_string();
        run.finished_at = Some(Utc::now());
        store.update_run(&run).await.unwrap();

        let loaded = store.last_run().await.unwrap().unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.scraped, 5);
        assert_eq!(loaded.get_status().unwrap(), RunStatus::Completed);
        assert!(loaded.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_summaries_page() {
        let (store, _tmp) = setup_test_store().await;
        let now = Utc::now();
        for i in 0..5 {
            store
                .upsert_web_items(&[web(&format!("g{i}"), now - Duration::minutes(i))])
                .await
                .unwrap();
            let s = SummaryRecord::new(
                ArticleKind::Web,
                format!("g{i}"),
                format!("https://blog.example/g{i}"),
                format!("T{i}"),
                "S".to_string(),
                "Example Blog".to_string(),
                Some(Category::News),
                now - Duration::minutes(i),
            );
            store.insert_summary(&s).await.unwrap();
        }

        let since = now - Duration::hours(1);
        let (page1, total) = store.summaries_page(since, 1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].article_id, "g0");

        let (page3, _) = store.summaries_page(since, 3, 2).await.unwrap();
        assert_eq!(page3.len(), 1);
    }
}
