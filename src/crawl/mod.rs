//! HTTP fetching
//!
//! Shared client construction plus a small text-fetch helper used by the
//! syndication adapters and transcript retrieval. Rendered pages go through
//! the headless renderer instead.

mod renderer;

pub use renderer::*;

use crate::error::{Error, FetchErrorKind, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Build the shared HTTP client
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .gzip(true)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
}

/// Fetch a URL as text, mapping failures to the adapter error taxonomy.
///
/// 5xx and transport errors are retriable; 4xx is not.
pub async fn fetch_text(client: &Client, source: &str, url: &str) -> Result<String> {
    debug!("Fetching {}", url);

    let response = client.get(url).send().await.map_err(|e| {
        let kind = if e.is_timeout() {
            FetchErrorKind::Timeout
        } else {
            FetchErrorKind::Network
        };
        Error::fetch_retriable(source, kind, e.to_string())
    })?;

    let status = response.status();
    if !status.is_success() {
        let retriable = status.is_server_error() || status.as_u16() == 429;
        let err = Error::Fetch {
            source_name: source.to_string(),
            kind: FetchErrorKind::Http,
            retriable,
            message: format!("HTTP {} for {}", status, url),
        };
        return Err(err);
    }

    response
        .text()
        .await
        .map_err(|e| Error::fetch_retriable(source, FetchErrorKind::Network, e.to_string()))
}

/// Fetch a URL as bytes (feed documents may not be valid UTF-8)
pub async fn fetch_bytes(client: &Client, source: &str, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await.map_err(|e| {
        let kind = if e.is_timeout() {
            FetchErrorKind::Timeout
        } else {
            FetchErrorKind::Network
        };
        Error::fetch_retriable(source, kind, e.to_string())
    })?;

    let status = response.status();
    if !status.is_success() {
        let retriable = status.is_server_error() || status.as_u16() == 429;
        return Err(Error::Fetch {
            source_name: source.to_string(),
            kind: FetchErrorKind::Http,
            retriable,
            message: format!("HTTP {} for {}", status, url),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::fetch_retriable(source, FetchErrorKind::Network, e.to_string()))?;
    Ok(bytes.to_vec())
}
