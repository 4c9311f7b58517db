//! Intro composition service
//!
//! Writes the greeting and overview paragraph that opens the digest email.
//! Failure here degrades to a static greeting; it never blocks the email.

use super::{parse_reply, CompletionRequest, ModelClient};
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::profile::UserProfile;
use crate::rank::RankedItem;
use serde::Deserialize;

const SYSTEM_PROMPT: &str = "You write the short opening of a personalized \
    news digest email. Reply with a single JSON object: {\"greeting\": \
    string, \"overview\": string}. The greeting addresses the reader by \
    name; the overview is 2-3 sentences tying today's top items together. \
    No other text.";

/// Opening block of the digest email
#[derive(Debug, Clone, Deserialize)]
pub struct DigestIntro {
    pub greeting: String,
    pub overview: String,
}

impl DigestIntro {
    /// Static fallback used when composition fails
    pub fn fallback(profile: &UserProfile, item_count: usize) -> Self {
        Self {
            greeting: format!("Hi {},", profile.name),
            overview: format!(
                "Here are today's top {} items from your sources.",
                item_count
            ),
        }
    }
}

/// Intro composition against the shared model pool
pub struct IntroService {
    client: ModelClient,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl IntroService {
    pub fn new(client: ModelClient, model: String, temperature: f32, max_tokens: usize) -> Self {
        Self {
            client,
            model,
            temperature,
            max_tokens,
        }
    }

    fn build_prompt(&self, profile: &UserProfile, ranked: &[RankedItem]) -> String {
        let mut prompt = format!("Reader profile: {}\n\nToday's items:\n", profile.describe());
        for item in ranked {
            prompt.push_str(&format!("{}. {}\n", item.rank, item.title));
        }
        prompt
    }

    /// Compose the intro for a ranked list
    pub async fn compose(
        &self,
        profile: &UserProfile,
        ranked: &[RankedItem],
        cancel: &CancelToken,
    ) -> Result<DigestIntro> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: self.build_prompt(profile, ranked),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let reply = self.client.generate(&request, cancel).await?;
        parse_reply::<DigestIntro>(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedEndpoint;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn ranked_item(rank: usize) -> RankedItem {
        RankedItem {
            record_id: format!("web:g{rank}"),
            rank,
            score: 9.0 - rank as f32,
            reasoning: String::new(),
            title: format!("Item {rank}"),
            summary: "S.".to_string(),
            url: format!("https://blog.example/g{rank}"),
            source_name: "Example Blog".to_string(),
            published_at: Utc::now(),
            degraded: false,
        }
    }

    fn service(endpoint: Arc<ScriptedEndpoint>) -> IntroService {
        let client = ModelClient::new(
            endpoint,
            Arc::new(Semaphore::new(2)),
            Duration::from_secs(5),
            3,
        );
        IntroService::new(client, "m".to_string(), 0.7, 256)
    }

    #[tokio::test]
    async fn test_compose_parses_reply() {
        let endpoint = ScriptedEndpoint::new(vec![Ok(
            r#"{"greeting": "Hi Ada,", "overview": "Busy day in AI."}"#.to_string(),
        )]);
        let intro = service(endpoint)
            .compose(
                &UserProfile::default(),
                &[ranked_item(1), ranked_item(2)],
                &CancelToken::never(),
            )
            .await
            .unwrap();
        assert_eq!(intro.greeting, "Hi Ada,");
    }

    #[test]
    fn test_fallback_mentions_reader_and_count() {
        let profile = UserProfile {
            name: "Ada".to_string(),
            ..Default::default()
        };
        let intro = DigestIntro::fallback(&profile, 3);
        assert!(intro.greeting.contains("Ada"));
        assert!(intro.overview.contains('3'));
    }
}
