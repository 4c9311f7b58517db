//! Summary service
//!
//! Turns one harvested item into a short digest record. The model reply is
//! parsed and validated into `DigestSummary`; malformed replies are retried
//! a bounded number of times, then the item fails (the run continues).

use super::{parse_reply, CompletionRequest, ModelClient};
use crate::cancel::CancelToken;
use crate::error::{Error, ModelError, ModelFailure, Result};
use crate::parse::truncate_chars;
use crate::store::{ArticleKind, PendingArticle};
use serde::Deserialize;
use tracing::{debug, warn};

/// Maximum accepted title length
const TITLE_BUDGET: usize = 200;

const SYSTEM_PROMPT: &str = "You are a news analyst. You write faithful, \
    concrete summaries of AI news items. Reply with a single JSON object: \
    {\"title\": string, \"summary\": string}. The title is at most 200 \
    characters; the summary is 2 to 4 plain sentences. No markdown, no \
    preamble.";

/// Validated summary of one item
#[derive(Debug, Clone, Deserialize)]
pub struct DigestSummary {
    pub title: String,
    pub summary: String,
}

impl DigestSummary {
    fn validate(self) -> Result<Self> {
        let title = self.title.trim().to_string();
        let summary = self.summary.trim().to_string();
        if title.is_empty() || title.len() > TITLE_BUDGET {
            return Err(Error::Model(ModelError::invalid(format!(
                "title length {} outside (0, {}]",
                title.len(),
                TITLE_BUDGET
            ))));
        }
        if summary.is_empty() {
            return Err(Error::Model(ModelError::invalid("empty summary")));
        }
        Ok(Self { title, summary })
    }
}

/// Per-item summarization against the shared model pool
pub struct SummaryService {
    client: ModelClient,
    model: String,
    temperature: f32,
    max_tokens: usize,
    input_budget: usize,
    parse_retries: u32,
}

impl SummaryService {
    pub fn new(
        client: ModelClient,
        model: String,
        temperature: f32,
        max_tokens: usize,
        input_budget: usize,
        parse_retries: u32,
    ) -> Self {
        Self {
            client,
            model,
            temperature,
            max_tokens,
            input_budget,
            parse_retries,
        }
    }

    fn build_prompt(&self, article: &PendingArticle) -> String {
        let body = truncate_chars(&article.body, self.input_budget);
        let kind_line = match article.kind {
            ArticleKind::Video => format!(
                "Video from channel {} (transcript below).",
                article.source_name
            ),
            ArticleKind::Web => format!("Article from {}.", article.source_name),
        };
        format!(
            "{kind_line}\nOriginal title: {}\nURL: {}\n\nContent:\n{}",
            article.title, article.url, body
        )
    }

    /// Summarize one item; `Invalid` replies consume the parse-retry budget
    pub async fn summarize(
        &self,
        article: &PendingArticle,
        cancel: &CancelToken,
    ) -> Result<DigestSummary> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: self.build_prompt(article),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut parse_attempt = 0u32;
        loop {
            cancel.check()?;
            let reply = self.client.generate(&request, cancel).await?;

            match parse_reply::<DigestSummary>(&reply).and_then(DigestSummary::validate) {
                Ok(summary) => {
                    debug!(
                        article = article.record_id().as_str(),
                        "Summary generated"
                    );
                    return Ok(summary);
                }
                Err(Error::Model(e)) if e.failure == ModelFailure::Invalid => {
                    if parse_attempt < self.parse_retries {
                        parse_attempt += 1;
                        warn!(
                            article = article.record_id().as_str(),
                            attempt = parse_attempt,
                            "Malformed summary reply, retrying: {}",
                            e
                        );
                        continue;
                    }
                    return Err(Error::Model(ModelError::permanent(format!(
                        "summary reply stayed malformed after {} retries: {}",
                        self.parse_retries, e
                    ))));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedEndpoint;
    use crate::store::Category;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn article() -> PendingArticle {
        PendingArticle {
            kind: ArticleKind::Web,
            article_id: "g1".to_string(),
            url: "https://blog.example/g1".to_string(),
            title: "Original".to_string(),
            source_name: "Example Blog".to_string(),
            category: Some(Category::News),
            published_at: Utc::now(),
            body: "Body text. ".repeat(50),
        }
    }

    fn service(endpoint: Arc<ScriptedEndpoint>, parse_retries: u32) -> SummaryService {
        let client = ModelClient::new(
            endpoint,
            Arc::new(Semaphore::new(2)),
            Duration::from_secs(5),
            3,
        );
        SummaryService::new(client, "m".to_string(), 0.7, 512, 200, parse_retries)
    }

    #[tokio::test]
    async fn test_valid_reply_parses() {
        let endpoint = ScriptedEndpoint::new(vec![Ok(
            r#"{"title": "Short Title", "summary": "One sentence. Another sentence."}"#.to_string(),
        )]);
        let summary = service(endpoint, 2)
            .summarize(&article(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(summary.title, "Short Title");
        assert!(summary.summary.contains("Another"));
    }

    #[tokio::test]
    async fn test_malformed_reply_retried_then_fails() {
        let endpoint = ScriptedEndpoint::new(vec![
            Ok("not json at all".to_string()),
            Ok("still not json".to_string()),
            Ok("nope".to_string()),
        ]);
        let err = service(endpoint, 2)
            .summarize(&article(), &CancelToken::never())
            .await
            .unwrap_err();
        match err {
            Error::Model(e) => assert_eq!(e.failure, ModelFailure::Permanent),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_then_valid_recovers() {
        let endpoint = ScriptedEndpoint::new(vec![
            Ok("garbage".to_string()),
            Ok(r#"{"title": "T", "summary": "S."}"#.to_string()),
        ]);
        let summary = service(endpoint, 2)
            .summarize(&article(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(summary.title, "T");
    }

    #[tokio::test]
    async fn test_overlong_title_rejected() {
        let long_title = "x".repeat(300);
        let endpoint = ScriptedEndpoint::new(vec![Ok(format!(
            r#"{{"title": "{long_title}", "summary": "S."}}"#
        ))]);
        let err = service(endpoint, 0)
            .summarize(&article(), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }

    #[test]
    fn test_prompt_respects_input_budget() {
        let endpoint = ScriptedEndpoint::new(vec![]);
        let svc = service(endpoint, 0);
        let prompt = svc.build_prompt(&article());
        // Body alone is ~550 chars; budget is 200
        assert!(prompt.len() < 500);
        assert!(prompt.contains("Example Blog"));
    }
}
