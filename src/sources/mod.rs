//! Source adapters
//!
//! Every feed the engine harvests sits behind the same capability set: given
//! a lower-bound timestamp, produce normalized items. Adapters are pure
//! functions of external state plus `since`; persistence happens elsewhere.
//!
//! Two families exist: syndication adapters parse a feed document, rendered
//! adapters materialize a page in a headless browser first.

mod rendered;
mod syndication;

pub use rendered::*;
pub use syndication::*;

use crate::config::{Config, SourceKind, SourceSpec};
use crate::crawl::{PageRenderer, RendererConfig};
use crate::error::Result;
use crate::store::{VideoItem, WebItem};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Upstream clocks drift; accept entries this far outside the window
pub const CLOCK_SKEW_TOLERANCE_MINS: i64 = 5;

/// A normalized item produced by an adapter
#[derive(Debug, Clone)]
pub enum FetchedItem {
    Video(VideoItem),
    Web(WebItem),
}

impl FetchedItem {
    /// Natural key used for dedup within and across calls
    pub fn natural_key(&self) -> String {
        match self {
            FetchedItem::Video(v) => v.record_id(),
            FetchedItem::Web(w) => w.record_id(),
        }
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        match self {
            FetchedItem::Video(v) => v.published_at,
            FetchedItem::Web(w) => w.published_at,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            FetchedItem::Video(v) => &v.title,
            FetchedItem::Web(w) => &w.title,
        }
    }
}

/// One content source behind the shared capability set
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique source name from the catalog
    fn name(&self) -> &str;

    /// Adapter family
    fn kind(&self) -> SourceKind;

    /// Produce normalized items with `published_at` within `[since, now]`
    /// (small clock skew tolerated). Empty output is not an error.
    async fn fetch(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<FetchedItem>>;

    /// Whether this adapter produced the given item (used to route
    /// enrichment in the Process stage)
    fn owns(&self, item: &FetchedItem) -> bool;

    /// Retrieve the expensive item body (video transcript, article content).
    /// Deferred to the Process stage so duplicates never pay for it.
    async fn enrich(&self, _item: &FetchedItem) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Window lower bound including skew tolerance
pub fn window_floor(since: DateTime<Utc>) -> DateTime<Utc> {
    since - Duration::minutes(CLOCK_SKEW_TOLERANCE_MINS)
}

/// Window upper bound including skew tolerance
pub fn window_ceil(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(CLOCK_SKEW_TOLERANCE_MINS)
}

/// Stable identifier derived from a URL, for feeds that omit entry ids
pub fn url_guid(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{:x}", digest)[..32].to_string()
}

/// Drop repeated natural keys within a single adapter call, keeping the
/// first (newest-first) occurrence.
pub fn dedup_in_call(items: Vec<FetchedItem>) -> Vec<FetchedItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.natural_key()))
        .collect()
}

/// Build adapters from the catalog.
///
/// All adapters share one HTTP client; rendered adapters additionally share
/// the renderer and the render-pool permits.
pub fn build_adapters(
    config: &Config,
    client: reqwest::Client,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let renderer = Arc::new(PageRenderer::new(RendererConfig {
        timeout_secs: config.timeouts.render_secs,
        ..RendererConfig::default()
    }));
    let render_permits = Arc::new(Semaphore::new(config.pools.render));

    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::with_capacity(config.sources.len());
    for spec in &config.sources {
        adapters.push(build_adapter(
            spec,
            client.clone(),
            renderer.clone(),
            render_permits.clone(),
        ));
    }
    Ok(adapters)
}

fn build_adapter(
    spec: &SourceSpec,
    client: reqwest::Client,
    renderer: Arc<PageRenderer>,
    render_permits: Arc<Semaphore>,
) -> Arc<dyn SourceAdapter> {
    match spec.kind {
        SourceKind::Syndication => Arc::new(SyndicationAdapter::new(spec.clone(), client)),
        SourceKind::Rendered => Arc::new(RenderedAdapter::new(
            spec.clone(),
            renderer,
            render_permits,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Category;

    fn web_item(guid: &str) -> FetchedItem {
        FetchedItem::Web(WebItem::new(
            guid.to_string(),
            "src".to_string(),
            "t".to_string(),
            "https://example.com".to_string(),
            String::new(),
            Utc::now(),
            Category::News,
        ))
    }

    #[test]
    fn test_dedup_in_call_keeps_first() {
        let items = vec![web_item("a"), web_item("b"), web_item("a")];
        let deduped = dedup_in_call(items);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].natural_key(), "web:a");
        assert_eq!(deduped[1].natural_key(), "web:b");
    }

    #[test]
    fn test_url_guid_stable_and_distinct() {
        let a = url_guid("https://example.com/one");
        let b = url_guid("https://example.com/one");
        let c = url_guid("https://example.com/two");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_window_bounds_tolerate_skew() {
        let now = Utc::now();
        let since = now - Duration::hours(24);
        assert!(window_floor(since) < since);
        assert!(window_ceil(now) > now);
    }
}
