//! Language-model endpoint access
//!
//! One HTTP client for the chat-completions endpoint, wrapped by a
//! `ModelClient` that owns the shared concurrency permits, the per-call
//! timeout, and the retry discipline (rate limits honor the provider's
//! retry-after hint; transient failures back off; permanent failures fail
//! the item, never the run).
//!
//! Three thin services sit on top: summarize, score, and intro composition.
//! Each is a prompt plus a parse-and-validate step; raw model text never
//! leaves this module.

mod intro;
mod score;
mod summarize;

pub use intro::*;
pub use score::*;
pub use summarize::*;

use crate::cancel::CancelToken;
use crate::error::{Error, ModelError, Result};
use crate::fetch::backoff_delay;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::warn;

/// One completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Anything that can answer a completion request
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Return the raw completion text; failures map to `Error::Model`
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// HTTP implementation against an OpenAI-compatible chat endpoint
pub struct HttpModelEndpoint {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpModelEndpoint {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

/// Minimal slice of the chat-completions reply we consume
#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatCompletion {
    fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.is_empty())
    }
}

/// Map a failed status to the retry taxonomy; 429 carries the retry-after hint
async fn classify_failure(response: reqwest::Response) -> ModelError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let detail = format!("HTTP {}: {}", status, body);

    if status.as_u16() == 429 {
        ModelError::rate_limited(retry_after, detail)
    } else if status.is_server_error() {
        ModelError::transient(detail)
    } else {
        ModelError::permanent(detail)
    }
}

#[async_trait]
impl ModelEndpoint for HttpModelEndpoint {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Model(ModelError::transient(e.to_string())))?;

        if !response.status().is_success() {
            return Err(Error::Model(classify_failure(response).await));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| Error::Model(ModelError::transient(e.to_string())))?;

        completion
            .into_text()
            .ok_or_else(|| Error::Model(ModelError::transient("empty completion")))
    }
}

/// Shared-pool wrapper every model-facing service goes through.
///
/// The external endpoint is the scarce resource; summaries, ranking, and
/// intro composition all draw from the same permits.
#[derive(Clone)]
pub struct ModelClient {
    endpoint: Arc<dyn ModelEndpoint>,
    permits: Arc<Semaphore>,
    op_timeout: Duration,
    max_attempts: u32,
}

impl ModelClient {
    pub fn new(
        endpoint: Arc<dyn ModelEndpoint>,
        permits: Arc<Semaphore>,
        op_timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            endpoint,
            permits,
            op_timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run one completion under the shared permits with retry discipline
    pub async fn generate(
        &self,
        request: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;

        let mut attempt = 0u32;
        loop {
            cancel.check()?;

            let result = match timeout(self.op_timeout, self.endpoint.complete(request)).await {
                Ok(r) => r,
                Err(_) => Err(Error::Model(ModelError::transient(format!(
                    "completion exceeded {:?}",
                    self.op_timeout
                )))),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(Error::Model(e)) if e.is_retriable() && attempt + 1 < self.max_attempts => {
                    let delay = match &e.failure {
                        crate::error::ModelFailure::RateLimited {
                            retry_after: Some(hint),
                        } => *hint,
                        _ => backoff_delay(attempt),
                    };
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Model call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Pull a JSON object out of a model reply.
///
/// Models wrap JSON in code fences or prose more often than not; take the
/// outermost `{...}` span and parse that.
pub fn extract_json(reply: &str) -> Result<serde_json::Value> {
    let start = reply
        .find('{')
        .ok_or_else(|| Error::Model(ModelError::invalid("no JSON object in reply")))?;
    let end = reply
        .rfind('}')
        .ok_or_else(|| Error::Model(ModelError::invalid("unterminated JSON object")))?;
    if end < start {
        return Err(Error::Model(ModelError::invalid("malformed JSON span")));
    }
    serde_json::from_str(&reply[start..=end])
        .map_err(|e| Error::Model(ModelError::invalid(e.to_string())))
}

/// Parse a reply into a typed record via `extract_json`
pub fn parse_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T> {
    let value = extract_json(reply)?;
    serde_json::from_value(value).map_err(|e| Error::Model(ModelError::invalid(e.to_string())))
}
