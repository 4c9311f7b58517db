//! Source catalog
//!
//! The set of feeds the engine harvests is configuration, not code: adding a
//! syndication source is a `[[sources]]` entry in the config file. Rendered
//! sources additionally pick a mode (listing page vs single article).

use crate::store::Category;
use serde::{Deserialize, Serialize};

/// Adapter families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Well-formed RSS/Atom feed at a known URL
    Syndication,
    /// Page that needs headless rendering before extraction
    Rendered,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Syndication => write!(f, "syndication"),
            SourceKind::Rendered => write!(f, "rendered"),
        }
    }
}

/// How a rendered page is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Extract a listing of article links, then fetch each page
    Listing,
    /// Treat the page itself as a single article
    Article,
}

fn default_render_mode() -> RenderMode {
    RenderMode::Article
}

fn default_max_listing_articles() -> usize {
    10
}

/// Static configuration record for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Unique source name; also tags items in the store
    pub name: String,

    /// Adapter family
    pub kind: SourceKind,

    /// Category assigned to web items from this source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    /// Landing URL (rendered sources fetch this)
    pub endpoint: String,

    /// Feed URL for syndication sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,

    /// Video-channel id; when set, entries become video items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    /// URL template for transcript retrieval, `{id}` replaced by video id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_url_template: Option<String>,

    /// Rendered sources only
    #[serde(default = "default_render_mode")]
    pub mode: RenderMode,

    /// Cap on listing-extracted articles per fetch
    #[serde(default = "default_max_listing_articles")]
    pub max_listing_articles: usize,
}

impl SourceSpec {
    /// Whether this source yields video items
    pub fn is_video(&self) -> bool {
        self.channel_id.is_some()
    }

    fn syndication(name: &str, endpoint: &str, feed_url: &str, category: Category) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Syndication,
            category: Some(category),
            endpoint: endpoint.to_string(),
            feed_url: Some(feed_url.to_string()),
            channel_id: None,
            transcript_url_template: None,
            mode: RenderMode::Article,
            max_listing_articles: default_max_listing_articles(),
        }
    }

    fn rendered(name: &str, endpoint: &str, category: Category, mode: RenderMode) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Rendered,
            category: Some(category),
            endpoint: endpoint.to_string(),
            feed_url: None,
            channel_id: None,
            transcript_url_template: None,
            mode,
            max_listing_articles: default_max_listing_articles(),
        }
    }

    fn video_channel(name: &str, channel_id: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Syndication,
            category: None,
            endpoint: format!("https://www.youtube.com/channel/{channel_id}"),
            feed_url: Some(format!(
                "https://www.youtube.com/feeds/videos.xml?channel_id={channel_id}"
            )),
            channel_id: Some(channel_id.to_string()),
            transcript_url_template: None,
            mode: RenderMode::Article,
            max_listing_articles: default_max_listing_articles(),
        }
    }
}

/// Built-in catalog used when the config file lists no sources
pub fn default_catalog() -> Vec<SourceSpec> {
    use Category::*;

    vec![
        // Video channels
        SourceSpec::video_channel("Varun Mayya", "UCyR2Ct3pDOeZSRyZH5hPO-Q"),
        SourceSpec::video_channel("Krish Naik", "UCNU_lfiiWBdtULKOw6X0Dig"),
        SourceSpec::video_channel("Codebasics", "UCh9nVJoWXmFb7sLApWGcLPQ"),
        // Official company blogs
        SourceSpec::syndication(
            "OpenAI Blog",
            "https://openai.com/blog",
            "https://openai.com/news/rss.xml",
            Official,
        ),
        SourceSpec::syndication(
            "Anthropic Blog",
            "https://www.anthropic.com/news",
            "https://www.anthropic.com/news/rss",
            Official,
        ),
        SourceSpec::syndication(
            "Google AI Blog",
            "https://blog.google/technology/ai/",
            "https://blog.google/technology/ai/rss/",
            Official,
        ),
        SourceSpec::syndication(
            "Hugging Face Blog",
            "https://huggingface.co/blog",
            "https://huggingface.co/blog/feed.xml",
            Official,
        ),
        SourceSpec::syndication(
            "Meta AI Blog",
            "https://ai.meta.com/blog/",
            "https://ai.meta.com/blog/rss/",
            Official,
        ),
        SourceSpec::syndication(
            "Microsoft AI Blog",
            "https://blogs.microsoft.com/ai/",
            "https://blogs.microsoft.com/ai/feed/",
            Official,
        ),
        SourceSpec::syndication(
            "Mistral AI News",
            "https://mistral.ai/news/",
            "https://mistral.ai/feed.xml",
            Official,
        ),
        SourceSpec::syndication(
            "Stability AI News",
            "https://stability.ai/news",
            "https://stability.ai/news?format=rss",
            Official,
        ),
        // Research
        SourceSpec::syndication(
            "arXiv cs.AI",
            "https://arxiv.org/list/cs.AI/recent",
            "https://rss.arxiv.org/rss/cs.AI",
            Research,
        ),
        SourceSpec::syndication(
            "arXiv cs.LG",
            "https://arxiv.org/list/cs.LG/recent",
            "https://rss.arxiv.org/rss/cs.LG",
            Research,
        ),
        SourceSpec::syndication(
            "BAIR Blog",
            "https://bair.berkeley.edu/blog/",
            "https://bair.berkeley.edu/blog/feed.xml",
            Research,
        ),
        SourceSpec::syndication(
            "MIT News AI",
            "https://news.mit.edu/topic/artificial-intelligence2",
            "https://news.mit.edu/rss/topic/artificial-intelligence2",
            Research,
        ),
        // News / commentary
        SourceSpec::syndication(
            "TechCrunch AI",
            "https://techcrunch.com/category/artificial-intelligence/",
            "https://techcrunch.com/category/artificial-intelligence/feed/",
            News,
        ),
        SourceSpec::syndication(
            "VentureBeat AI",
            "https://venturebeat.com/category/ai/",
            "https://venturebeat.com/category/ai/feed/",
            News,
        ),
        SourceSpec::syndication(
            "The Verge AI",
            "https://www.theverge.com/ai-artificial-intelligence",
            "https://www.theverge.com/rss/ai-artificial-intelligence/index.xml",
            News,
        ),
        SourceSpec::syndication(
            "Ars Technica AI",
            "https://arstechnica.com/ai/",
            "https://arstechnica.com/ai/feed/",
            News,
        ),
        SourceSpec::syndication(
            "MIT Technology Review AI",
            "https://www.technologyreview.com/topic/artificial-intelligence/",
            "https://www.technologyreview.com/topic/artificial-intelligence/feed",
            News,
        ),
        // Safety
        SourceSpec::syndication(
            "Alignment Forum",
            "https://www.alignmentforum.org/",
            "https://www.alignmentforum.org/feed.xml",
            Safety,
        ),
        SourceSpec::syndication(
            "LessWrong",
            "https://www.lesswrong.com/",
            "https://www.lesswrong.com/feed.xml",
            Safety,
        ),
        // Rendered pages (no usable feed)
        SourceSpec::rendered(
            "DeepMind Blog",
            "https://deepmind.google/discover/blog/",
            Official,
            RenderMode::Listing,
        ),
        SourceSpec::rendered(
            "xAI News",
            "https://x.ai/news",
            Official,
            RenderMode::Listing,
        ),
        SourceSpec::rendered(
            "AI Safety Institute",
            "https://www.aisi.gov.uk/work",
            Safety,
            RenderMode::Article,
        ),
    ]
}
