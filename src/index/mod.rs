//! Local vector index
//!
//! This module stores embeddings plus metadata in a directory-backed
//! collection: one JSON snapshot per collection, rewritten atomically on
//! mutation (write to a temp file, then rename). It provides:
//! - Keyed upsert/delete (idempotent)
//! - Deterministic cosine nearest-neighbor search with metadata filters
//! - Counts for the stats surface
//!
//! Writes go through a single owner (the indexer); reads are concurrent.

mod indexer;

pub use indexer::*;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Metadata carried alongside each vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMeta {
    pub article_kind: String,
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
}

/// One indexed record, keyed one-to-one with a summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub meta: VectorMeta,
}

/// A nearest-neighbor hit
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub meta: VectorMeta,
}

/// Metadata predicates for queries
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub article_kind: Option<String>,
    pub category: Option<String>,
}

impl MetadataFilter {
    pub fn matches(&self, meta: &VectorMeta) -> bool {
        if let Some(kind) = &self.article_kind {
            if &meta.article_kind != kind {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if meta.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.article_kind.is_none() && self.category.is_none()
    }
}

/// Directory-backed vector collection
#[derive(Debug)]
pub struct VectorStore {
    path: PathBuf,
    dimension: usize,
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl VectorStore {
    /// Open (or create) a collection under `dir`
    pub async fn open(dir: &Path, collection: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{collection}.json"));

        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let loaded: Vec<VectorRecord> = serde_json::from_str(&content)?;

            for record in &loaded {
                if record.vector.len() != dimension {
                    return Err(Error::Config(format!(
                        "collection '{}' holds vectors of dimension {}, config expects {}; \
                         reindex or point at a new collection",
                        collection,
                        record.vector.len(),
                        dimension
                    )));
                }
            }

            info!(
                "Loaded vector collection '{}' ({} records)",
                collection,
                loaded.len()
            );
            loaded.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            info!("Creating vector collection '{}'", collection);
            HashMap::new()
        };

        Ok(Self {
            path,
            dimension,
            records: RwLock::new(records),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or replace a record by id
    pub async fn upsert(&self, record: VectorRecord) -> Result<()> {
        self.upsert_batch(vec![record]).await
    }

    /// Insert or replace a batch of records
    pub async fn upsert_batch(&self, batch: Vec<VectorRecord>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for record in &batch {
            if record.vector.len() != self.dimension {
                return Err(Error::Index(format!(
                    "vector for '{}' has dimension {}, expected {}",
                    record.id,
                    record.vector.len(),
                    self.dimension
                )));
            }
        }

        let mut records = self.records.write().await;
        for record in batch {
            records.insert(record.id.clone(), record);
        }
        self.persist(&records)?;
        Ok(())
    }

    /// Remove a record; absent ids are a no-op
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if records.remove(id).is_some() {
            self.persist(&records)?;
        }
        Ok(())
    }

    /// Whether a record exists
    pub async fn contains(&self, id: &str) -> bool {
        self.records.read().await.contains_key(id)
    }

    /// Top-k nearest records by cosine similarity.
    ///
    /// Ties break by `published_at` descending, then id ascending, so the
    /// result order is deterministic.
    pub async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        if vector.len() != self.dimension {
            return Err(Error::Index(format!(
                "query vector has dimension {}, expected {}",
                vector.len(),
                self.dimension
            )));
        }

        let records = self.records.read().await;
        let mut hits: Vec<SearchHit> = records
            .values()
            .filter(|r| filter.matches(&r.meta))
            .map(|r| SearchHit {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                meta: r.meta.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.meta.published_at.cmp(&a.meta.published_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);

        debug!(k = k, hits = hits.len(), "Vector query complete");
        Ok(hits)
    }

    /// Number of records matching the filter
    pub async fn count(&self, filter: &MetadataFilter) -> usize {
        let records = self.records.read().await;
        if filter.is_empty() {
            records.len()
        } else {
            records.values().filter(|r| filter.matches(&r.meta)).count()
        }
    }

    /// Snapshot write: temp file then rename, so a crash never truncates
    /// the collection
    fn persist(&self, records: &HashMap<String, VectorRecord>) -> Result<()> {
        let mut snapshot: Vec<&VectorRecord> = records.values().collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        let content = serde_json::to_string(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Cosine similarity between two vectors of equal length
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn meta(kind: &str, category: Option<&str>, published_at: DateTime<Utc>) -> VectorMeta {
        VectorMeta {
            article_kind: kind.to_string(),
            url: "https://example.com".to_string(),
            title: "t".to_string(),
            category: category.map(|c| c.to_string()),
            published_at,
            source_name: "src".to_string(),
        }
    }

    fn record(id: &str, vector: Vec<f32>, published_at: DateTime<Utc>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            meta: meta("web", Some("news"), published_at),
        }
    }

    async fn open_store(tmp: &TempDir) -> VectorStore {
        VectorStore::open(tmp.path(), "test", 3).await.unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let now = Utc::now();

        store.upsert(record("a", vec![1.0, 0.0, 0.0], now)).await.unwrap();
        store.upsert(record("a", vec![1.0, 0.0, 0.0], now)).await.unwrap();

        assert_eq!(store.count(&MetadataFilter::default()).await, 1);
    }

    #[tokio::test]
    async fn test_delete_then_reinsert_equivalent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let now = Utc::now();
        let r = record("a", vec![1.0, 0.0, 0.0], now);

        store.upsert(r.clone()).await.unwrap();
        store.delete("a").await.unwrap();
        assert!(!store.contains("a").await);
        store.upsert(r).await.unwrap();

        assert_eq!(store.count(&MetadataFilter::default()).await, 1);
        assert!(store.contains("a").await);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let err = store
            .upsert(record("a", vec![1.0, 0.0], Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Index(_)));
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let now = Utc::now();

        store.upsert(record("near", vec![1.0, 0.1, 0.0], now)).await.unwrap();
        store.upsert(record("far", vec![0.0, 1.0, 0.0], now)).await.unwrap();

        let hits = store
            .query(&[1.0, 0.0, 0.0], 2, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_query_tie_breaks() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let now = Utc::now();

        // Identical vectors: newest first, then id ascending
        store
            .upsert(record("b", vec![1.0, 0.0, 0.0], now))
            .await
            .unwrap();
        store
            .upsert(record("a", vec![1.0, 0.0, 0.0], now))
            .await
            .unwrap();
        store
            .upsert(record("c", vec![1.0, 0.0, 0.0], now + Duration::minutes(1)))
            .await
            .unwrap();

        let hits = store
            .query(&[1.0, 0.0, 0.0], 3, &MetadataFilter::default())
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_filters() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let now = Utc::now();

        let mut video = record("v", vec![1.0, 0.0, 0.0], now);
        video.meta = meta("video", None, now);
        store.upsert(video).await.unwrap();
        store.upsert(record("w", vec![1.0, 0.0, 0.0], now)).await.unwrap();

        let filter = MetadataFilter {
            article_kind: Some("web".to_string()),
            ..Default::default()
        };
        let hits = store.query(&[1.0, 0.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "w");

        let filter = MetadataFilter {
            category: Some("safety".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count(&filter).await, 0);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open_store(&tmp).await;
            store
                .upsert(record("a", vec![1.0, 0.0, 0.0], Utc::now()))
                .await
                .unwrap();
        }

        let reopened = open_store(&tmp).await;
        assert!(reopened.contains("a").await);
        assert_eq!(reopened.count(&MetadataFilter::default()).await, 1);
    }

    #[tokio::test]
    async fn test_reopen_with_wrong_dimension_fails() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open_store(&tmp).await;
            store
                .upsert(record("a", vec![1.0, 0.0, 0.0], Utc::now()))
                .await
                .unwrap();
        }

        let err = VectorStore::open(tmp.path(), "test", 5).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
