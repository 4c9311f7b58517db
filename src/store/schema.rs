//! SQLite schema definition

/// SQL schema for the record store
pub const SCHEMA_SQL: &str = r#"
-- Video items from channel feeds
CREATE TABLE IF NOT EXISTS items_video (
    video_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    published_at TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    transcript TEXT,
    created_at TEXT NOT NULL
);

-- Web items from syndication feeds and rendered pages
CREATE TABLE IF NOT EXISTS items_web (
    guid TEXT PRIMARY KEY,
    source_name TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    published_at TEXT NOT NULL,
    category TEXT NOT NULL,
    content TEXT,
    created_at TEXT NOT NULL
);

-- Model-produced summaries, at most one per source item
CREATE TABLE IF NOT EXISTS summaries (
    id TEXT PRIMARY KEY,
    article_kind TEXT NOT NULL,
    article_id TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT NOT NULL,
    source_name TEXT NOT NULL DEFAULT '',
    category TEXT,
    published_at TEXT NOT NULL,
    duplicate_of TEXT,
    ranking_degraded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(article_kind, article_id)
);

-- Pipeline run records
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    window_hours INTEGER NOT NULL,
    top_n INTEGER NOT NULL,
    stage TEXT NOT NULL,
    scraped INTEGER NOT NULL DEFAULT 0,
    new_items INTEGER NOT NULL DEFAULT 0,
    summarized INTEGER NOT NULL DEFAULT 0,
    indexed INTEGER NOT NULL DEFAULT 0,
    ranked INTEGER NOT NULL DEFAULT 0,
    emailed INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed_json TEXT,
    failed_adapters_json TEXT,
    status TEXT NOT NULL,
    error TEXT
);

-- Indexes for window queries and joins
CREATE INDEX IF NOT EXISTS idx_video_published ON items_video(published_at);
CREATE INDEX IF NOT EXISTS idx_web_published ON items_web(published_at);
CREATE INDEX IF NOT EXISTS idx_summaries_article ON summaries(article_kind, article_id);
CREATE INDEX IF NOT EXISTS idx_summaries_published ON summaries(published_at);
CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);
"#;
