//! Semantic retrieval
//!
//! Free-text queries over the vector collection. Duplicates never appear in
//! results because the indexer never inserts them.

use crate::embed::{embed_one, Embedder};
use crate::error::Result;
use crate::index::{MetadataFilter, SearchHit, VectorStore};
use std::sync::Arc;
use tracing::debug;

/// Read-side handle over the vector collection
#[derive(Clone)]
pub struct SemanticRetriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<VectorStore>,
}

impl SemanticRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, vectors: Arc<VectorStore>) -> Self {
        Self { embedder, vectors }
    }

    /// Top-k records nearest to a free-text query
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        let vector = embed_one(self.embedder.as_ref(), query).await?;
        let hits = self.vectors.query(&vector, k, filter).await?;
        debug!(query = query, hits = hits.len(), "Semantic search");
        Ok(hits)
    }

    /// Neighbors for a ranking candidate, excluding the candidate itself
    pub async fn neighbors(
        &self,
        record_id: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let vector = embed_one(self.embedder.as_ref(), text).await?;
        // Over-fetch by one so self-exclusion still fills k
        let hits = self
            .vectors
            .query(&vector, k + 1, &MetadataFilter::default())
            .await?;
        Ok(hits
            .into_iter()
            .filter(|h| h.id != record_id)
            .take(k)
            .collect())
    }

    /// Records currently indexed
    pub async fn indexed_count(&self) -> usize {
        self.vectors.count(&MetadataFilter::default()).await
    }
}
