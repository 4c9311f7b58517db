//! Personalized ranking
//!
//! Scores every candidate in the window against the user profile, with
//! neighbors retrieved from the vector collection as historical context,
//! then orders by score with deterministic tie-breaks. A candidate whose
//! scoring call cannot produce a usable reply is degraded to a neutral
//! score instead of being dropped.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::llm::{ItemScore, ScoreService};
use crate::profile::UserProfile;
use crate::retrieve::SemanticRetriever;
use crate::store::{RecordStore, SummaryRecord};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

/// One ranked entry of the digest
#[derive(Debug, Clone, Serialize)]
pub struct RankedItem {
    pub record_id: String,
    pub rank: usize,
    pub score: f32,
    pub reasoning: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    /// True when the neutral fallback score was assigned
    pub degraded: bool,
}

/// Ranking report for the run record
#[derive(Debug, Default)]
pub struct RankReport {
    pub items: Vec<RankedItem>,
    pub degraded: usize,
}

/// Profile-aware ranker over window candidates
pub struct Ranker {
    retriever: SemanticRetriever,
    scorer: ScoreService,
    store: RecordStore,
    profile: UserProfile,
    context_k: usize,
    concurrency: usize,
}

impl Ranker {
    pub fn new(
        retriever: SemanticRetriever,
        scorer: ScoreService,
        store: RecordStore,
        profile: UserProfile,
        context_k: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            retriever,
            scorer,
            store,
            profile,
            context_k,
            concurrency: concurrency.max(1),
        }
    }

    /// Rank the candidates and keep the top `top_n`
    pub async fn rank(
        &self,
        candidates: Vec<SummaryRecord>,
        top_n: usize,
        cancel: &CancelToken,
    ) -> Result<RankReport> {
        if candidates.is_empty() {
            return Ok(RankReport::default());
        }
        info!(candidates = candidates.len(), top_n = top_n, "Ranking window");

        let scored: Vec<(SummaryRecord, ItemScore, bool)> =
            stream::iter(candidates.into_iter().map(|candidate| {
                let cancel = cancel.clone();
                async move {
                    let (score, degraded) = self.score_candidate(&candidate, &cancel).await;
                    (candidate, score, degraded)
                }
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut degraded_count = 0;
        let mut items = Vec::with_capacity(scored.len());
        for (candidate, score, degraded) in scored {
            if degraded {
                degraded_count += 1;
                if let Ok(kind) = candidate.kind() {
                    if let Err(e) = self
                        .store
                        .mark_ranking_degraded(kind, &candidate.article_id)
                        .await
                    {
                        warn!(
                            candidate = candidate.record_id().as_str(),
                            "Failed to persist degraded mark: {}",
                            e
                        );
                    }
                }
            }
            items.push(RankedItem {
                record_id: candidate.record_id(),
                rank: 0,
                score: score.score,
                reasoning: score.reasoning,
                title: candidate.title,
                summary: candidate.summary,
                url: candidate.url,
                source_name: candidate.source_name,
                published_at: candidate.published_at,
                degraded,
            });
        }

        order_ranked(&mut items);
        items.truncate(top_n);
        for (i, item) in items.iter_mut().enumerate() {
            item.rank = i + 1;
        }

        Ok(RankReport {
            items,
            degraded: degraded_count,
        })
    }

    /// Score one candidate; retriever failures cost only the context
    async fn score_candidate(
        &self,
        candidate: &SummaryRecord,
        cancel: &CancelToken,
    ) -> (ItemScore, bool) {
        if cancel.is_cancelled() {
            return (ItemScore::neutral(), true);
        }

        let neighbors = match self
            .retriever
            .neighbors(
                &candidate.record_id(),
                &candidate.embedding_text(),
                self.context_k,
            )
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(
                    candidate = candidate.record_id().as_str(),
                    "Neighbor retrieval failed, ranking without context: {}",
                    e
                );
                Vec::new()
            }
        };

        match self
            .scorer
            .score(&self.profile, candidate, &neighbors, cancel)
            .await
        {
            Ok(score) => {
                debug!(
                    candidate = candidate.record_id().as_str(),
                    score = score.score,
                    "Candidate scored"
                );
                (score, false)
            }
            Err(e) => {
                warn!(
                    candidate = candidate.record_id().as_str(),
                    "Scoring degraded to neutral: {}",
                    e
                );
                (ItemScore::neutral(), true)
            }
        }
    }
}

/// Order: score descending, then `published_at` descending, then record id
pub fn order_ranked(items: &mut [RankedItem]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.published_at.cmp(&a.published_at))
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
}
