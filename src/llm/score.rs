//! Scoring service
//!
//! Scores one ranking candidate against the user profile, with retrieved
//! neighbors supplied as historical context. The reply must carry an overall
//! score, per-criterion sub-scores, and a short reasoning; one retry on a
//! malformed reply, after which the caller degrades the item to a neutral
//! score.

use super::{parse_reply, CompletionRequest, ModelClient};
use crate::cancel::CancelToken;
use crate::error::{Error, ModelError, ModelFailure, Result};
use crate::index::SearchHit;
use crate::profile::UserProfile;
use crate::store::SummaryRecord;
use serde::Deserialize;
use tracing::warn;

const SYSTEM_PROMPT: &str = "You are a personal news curator. Score how much \
    the reader should care about the candidate item, given their profile and \
    the historical context items. Reply with a single JSON object: \
    {\"score\": number 0-10, \"relevance\": number 0-10, \"depth\": number \
    0-10, \"novelty\": number 0-10, \"alignment\": number 0-10, \
    \"actionability\": number 0-10, \"reasoning\": string}. Reasoning is one \
    or two sentences. No other text.";

/// Malformed replies are retried this many times before degrading
const SCORE_PARSE_RETRIES: u32 = 1;

/// Validated scoring reply
#[derive(Debug, Clone, Deserialize)]
pub struct ItemScore {
    pub score: f32,
    pub relevance: f32,
    pub depth: f32,
    pub novelty: f32,
    pub alignment: f32,
    pub actionability: f32,
    #[serde(default)]
    pub reasoning: String,
}

impl ItemScore {
    /// Neutral score assigned when the model cannot produce a usable reply
    pub fn neutral() -> Self {
        Self {
            score: 5.0,
            relevance: 5.0,
            depth: 5.0,
            novelty: 5.0,
            alignment: 5.0,
            actionability: 5.0,
            reasoning: String::new(),
        }
    }

    fn validate(self) -> Result<Self> {
        let in_range = |v: f32| (0.0..=10.0).contains(&v);
        if ![
            self.score,
            self.relevance,
            self.depth,
            self.novelty,
            self.alignment,
            self.actionability,
        ]
        .iter()
        .all(|v| in_range(*v))
        {
            return Err(Error::Model(ModelError::invalid(format!(
                "score {} or a sub-score outside [0, 10]",
                self.score
            ))));
        }
        Ok(self)
    }
}

/// Per-candidate scoring against the shared model pool
pub struct ScoreService {
    client: ModelClient,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl ScoreService {
    pub fn new(client: ModelClient, model: String, temperature: f32, max_tokens: usize) -> Self {
        Self {
            client,
            model,
            temperature,
            max_tokens,
        }
    }

    fn build_prompt(
        &self,
        profile: &UserProfile,
        candidate: &SummaryRecord,
        neighbors: &[SearchHit],
    ) -> String {
        let mut prompt = format!(
            "Reader profile: {}\n\nCandidate item:\nTitle: {}\nSource: {}\nSummary: {}\n",
            profile.describe(),
            candidate.title,
            candidate.source_name,
            candidate.summary
        );

        if neighbors.is_empty() {
            prompt.push_str("\nHistorical context: none available.\n");
        } else {
            prompt.push_str("\nHistorical context (similar items already indexed):\n");
            for (i, hit) in neighbors.iter().enumerate() {
                prompt.push_str(&format!(
                    "{}. [{:.2}] {} ({})\n",
                    i + 1,
                    hit.score,
                    hit.meta.title,
                    hit.meta.source_name
                ));
            }
        }
        prompt
    }

    /// Score one candidate; `Err` means the caller should degrade the item
    pub async fn score(
        &self,
        profile: &UserProfile,
        candidate: &SummaryRecord,
        neighbors: &[SearchHit],
        cancel: &CancelToken,
    ) -> Result<ItemScore> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: self.build_prompt(profile, candidate, neighbors),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut parse_attempt = 0u32;
        loop {
            cancel.check()?;
            let reply = self.client.generate(&request, cancel).await?;

            match parse_reply::<ItemScore>(&reply).and_then(ItemScore::validate) {
                Ok(score) => return Ok(score),
                Err(Error::Model(e)) if e.failure == ModelFailure::Invalid => {
                    if parse_attempt < SCORE_PARSE_RETRIES {
                        parse_attempt += 1;
                        warn!(
                            candidate = candidate.record_id().as_str(),
                            "Malformed scoring reply, retrying once: {}",
                            e
                        );
                        continue;
                    }
                    return Err(Error::Model(e));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
