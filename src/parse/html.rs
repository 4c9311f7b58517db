//! HTML extraction for rendered pages
//!
//! Rendered sources give us a fully materialized DOM; this module turns it
//! into markdown-ish text for summarization and extracts article links from
//! listing pages.

use super::normalize_whitespace;
use scraper::{Html, Selector};
use url::Url;

/// An article link extracted from a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ListedArticle {
    pub url: String,
    pub title: Option<String>,
}

/// Extract the page title
pub fn extract_title(content: &str) -> Option<String> {
    let document = Html::parse_document(content);

    // Prefer og:title, fall back to <title>
    if let Ok(selector) = Selector::parse(r#"meta[property="og:title"]"#) {
        if let Some(meta) = document.select(&selector).next() {
            if let Some(title) = meta.value().attr("content") {
                let title = title.trim();
                if !title.is_empty() {
                    return Some(title.to_string());
                }
            }
        }
    }

    let selector = Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Convert rendered HTML to readable markdown-ish text
pub fn html_to_text(content: &str) -> String {
    // Restrict to <main>/<article> when present; nav and footer noise drowns
    // the model otherwise
    let document = Html::parse_document(content);
    let scoped = ["main", "article", "body"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|sel| document.select(&sel).next().map(|e| e.html()))
        .unwrap_or_else(|| content.to_string());

    let text = html2text::from_read(scoped.as_bytes(), 100);
    normalize_whitespace(&text)
}

/// Extract candidate article links from a listing page.
///
/// Keeps same-host links with a path deeper than the listing itself, resolves
/// relative hrefs against `base_url`, and dedups while preserving document
/// order.
pub fn extract_listing_links(content: &str, base_url: &str) -> Vec<ListedArticle> {
    let document = Html::parse_document(content);
    let base = match Url::parse(base_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let base_path = base.path().trim_end_matches('/').to_string();

    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for elem in document.select(&selector) {
        let Some(href) = elem.value().attr("href") else {
            continue;
        };
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);

        if resolved.host() != base.host() {
            continue;
        }
        let path = resolved.path().trim_end_matches('/');
        if path.is_empty() || path == base_path || !path.starts_with(&base_path) {
            continue;
        }

        let url = resolved.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        let text = elem.text().collect::<String>().trim().to_string();
        links.push(ListedArticle {
            url,
            title: if text.is_empty() { None } else { Some(text) },
        });
    }

    links
}
