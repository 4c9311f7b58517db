//! Syndication adapters
//!
//! Parse RSS/Atom documents at a known URL. Video-channel feeds map entries
//! to video items and expose transcript retrieval as their enrichment
//! capability; everything else becomes web items carrying the source's
//! configured category.

use super::{dedup_in_call, url_guid, window_ceil, window_floor, FetchedItem, SourceAdapter};
use crate::config::{SourceKind, SourceSpec};
use crate::crawl::fetch_text;
use crate::error::{Error, FetchErrorKind, Result};
use crate::parse::normalize_whitespace;
use crate::store::{VideoItem, WebItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Cap on stored entry descriptions
const DESCRIPTION_BUDGET: usize = 1000;

/// Adapter for a single feed
pub struct SyndicationAdapter {
    spec: SourceSpec,
    client: reqwest::Client,
}

impl SyndicationAdapter {
    pub fn new(spec: SourceSpec, client: reqwest::Client) -> Self {
        Self { spec, client }
    }

    fn feed_url(&self) -> Result<&str> {
        self.spec
            .feed_url
            .as_deref()
            .ok_or_else(|| Error::Config(format!("source '{}' has no feed_url", self.spec.name)))
    }

    fn entry_to_item(&self, entry: &feed_rs::model::Entry) -> Option<FetchedItem> {
        let published = entry.published.or(entry.updated)?;
        let url = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();
        if url.is_empty() {
            return None;
        }

        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let description = entry
            .summary
            .as_ref()
            .map(|s| clean_entry_text(&s.content))
            .unwrap_or_default();

        let entry_id = if entry.id.is_empty() {
            url_guid(&url)
        } else {
            entry.id.clone()
        };

        if let Some(channel_id) = &self.spec.channel_id {
            // Channel feed ids look like "yt:video:<id>"; keep the last segment
            let video_id = entry_id.rsplit(':').next().unwrap_or(&entry_id).to_string();
            Some(FetchedItem::Video(VideoItem::new(
                video_id,
                title,
                url,
                channel_id.clone(),
                published,
                description,
            )))
        } else {
            let category = self.spec.category?;
            Some(FetchedItem::Web(WebItem::new(
                entry_id,
                self.spec.name.clone(),
                title,
                url,
                description,
                published,
                category,
            )))
        }
    }
}

#[async_trait]
impl SourceAdapter for SyndicationAdapter {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Syndication
    }

    fn owns(&self, item: &FetchedItem) -> bool {
        match item {
            FetchedItem::Video(v) => self.spec.channel_id.as_deref() == Some(v.channel_id.as_str()),
            FetchedItem::Web(w) => w.source_name == self.spec.name,
        }
    }

    async fn fetch(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<FetchedItem>> {
        let feed_url = self.feed_url()?;
        let body = fetch_text(&self.client, &self.spec.name, feed_url).await?;

        let feed = feed_rs::parser::parse(body.as_bytes()).map_err(|e| {
            Error::fetch_fatal(
                &self.spec.name,
                FetchErrorKind::Parse,
                format!("feed parse: {}", e),
            )
        })?;

        let floor = window_floor(since);
        let ceil = window_ceil(now);

        let mut items: Vec<FetchedItem> = feed
            .entries
            .iter()
            .filter_map(|entry| self.entry_to_item(entry))
            .filter(|item| {
                let ts = item.published_at();
                ts >= floor && ts <= ceil
            })
            .collect();

        // Newest first within an adapter
        items.sort_by(|a, b| b.published_at().cmp(&a.published_at()));
        let items = dedup_in_call(items);

        debug!(
            source = self.spec.name.as_str(),
            count = items.len(),
            "Feed fetch complete"
        );
        Ok(items)
    }

    /// Transcript retrieval for video items; a no-op for everything else
    async fn enrich(&self, item: &FetchedItem) -> Result<Option<String>> {
        let FetchedItem::Video(video) = item else {
            return Ok(None);
        };
        let Some(template) = &self.spec.transcript_url_template else {
            debug!(
                source = self.spec.name.as_str(),
                "No transcript endpoint configured"
            );
            return Ok(None);
        };

        let url = template.replace("{id}", &video.video_id);
        match fetch_text(&self.client, &self.spec.name, &url).await {
            Ok(text) => {
                let text = normalize_whitespace(&text);
                if text.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(text))
                }
            }
            Err(e) => {
                warn!(
                    source = self.spec.name.as_str(),
                    video_id = video.video_id.as_str(),
                    "Transcript fetch failed: {}",
                    e
                );
                Err(e)
            }
        }
    }
}

/// Feed descriptions frequently embed HTML; flatten and cap them
fn clean_entry_text(raw: &str) -> String {
    let text = if raw.contains('<') {
        html2text::from_read(raw.as_bytes(), 100)
    } else {
        raw.to_string()
    };
    let text = normalize_whitespace(&text);
    let mut end = text.len().min(DESCRIPTION_BUDGET);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
