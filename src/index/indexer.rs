//! Embedding indexer
//!
//! Owns all writes to the vector collection. For each summary it embeds
//! `"<title>\n<summary>"`, suppresses near-duplicates against the existing
//! records, and keeps the collection consistent with the record store via a
//! reconciliation pass at the start of every pipeline run.

use super::{MetadataFilter, SearchHit, VectorMeta, VectorRecord, VectorStore};
use crate::cancel::CancelToken;
use crate::embed::{embed_in_batches, embed_one, Embedder};
use crate::error::Result;
use crate::store::{RecordStore, SummaryRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one summary during indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// New vector record written
    Inserted,
    /// Already present; nothing to do
    AlreadyIndexed,
    /// Suppressed as a near-duplicate of the given record id
    Duplicate(String),
}

/// Single writer for the vector collection
pub struct EmbeddingIndexer {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<VectorStore>,
    store: RecordStore,
    dup_threshold: f32,
    batch_size: usize,
}

impl EmbeddingIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<VectorStore>,
        store: RecordStore,
        dup_threshold: f32,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            vectors,
            store,
            dup_threshold,
            batch_size,
        }
    }

    fn meta_for(summary: &SummaryRecord) -> VectorMeta {
        VectorMeta {
            article_kind: summary.article_kind.clone(),
            url: summary.url.clone(),
            title: summary.title.clone(),
            category: summary.category.clone(),
            published_at: summary.published_at,
            source_name: summary.source_name.clone(),
        }
    }

    /// Index one summary, suppressing near-duplicates.
    ///
    /// The nearest existing neighbor is consulted before insert; at or above
    /// the duplicate threshold the summary is marked `duplicate_of` in the
    /// record store and no vector record is written.
    pub async fn index_summary(&self, summary: &SummaryRecord) -> Result<IndexOutcome> {
        let record_id = summary.record_id();

        if self.vectors.contains(&record_id).await {
            return Ok(IndexOutcome::AlreadyIndexed);
        }

        let vector = embed_one(self.embedder.as_ref(), &summary.embedding_text()).await?;

        let nearest = self
            .vectors
            .query(&vector, 1, &MetadataFilter::default())
            .await?;
        if let Some(SearchHit { id, score, .. }) = nearest.first() {
            if *score >= self.dup_threshold && *id != record_id {
                info!(
                    summary = record_id.as_str(),
                    duplicate_of = id.as_str(),
                    score = *score,
                    "Near-duplicate suppressed"
                );
                self.store
                    .mark_duplicate(summary.kind()?, &summary.article_id, id)
                    .await?;
                return Ok(IndexOutcome::Duplicate(id.clone()));
            }
        }

        self.vectors
            .upsert(VectorRecord {
                id: record_id,
                vector,
                meta: Self::meta_for(summary),
            })
            .await?;
        Ok(IndexOutcome::Inserted)
    }

    /// Recreate vector records for summaries that lost theirs (crash between
    /// the two writes of the dual-write). Never re-invokes the summary model.
    ///
    /// Only summaries created before `created_before` are restored; anything
    /// newer is this run's own output and goes through `index_summary` with
    /// its duplicate check.
    pub async fn reconcile(
        &self,
        since: DateTime<Utc>,
        created_before: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let summaries = self.store.rankable_summaries(since).await?;

        let mut missing = Vec::new();
        for summary in summaries {
            cancel.check()?;
            if summary.created_at < created_before
                && !self.vectors.contains(&summary.record_id()).await
            {
                missing.push(summary);
            }
        }
        if missing.is_empty() {
            return Ok(0);
        }

        warn!(
            count = missing.len(),
            "Reconciling summaries without vector records"
        );

        let texts: Vec<String> = missing.iter().map(|s| s.embedding_text()).collect();
        let vectors = embed_in_batches(self.embedder.as_ref(), texts, self.batch_size).await?;

        let batch: Vec<VectorRecord> = missing
            .iter()
            .zip(vectors)
            .map(|(summary, vector)| VectorRecord {
                id: summary.record_id(),
                vector,
                meta: Self::meta_for(summary),
            })
            .collect();
        let restored = batch.len();
        self.vectors.upsert_batch(batch).await?;

        debug!(restored = restored, "Reconciliation complete");
        Ok(restored)
    }
}
