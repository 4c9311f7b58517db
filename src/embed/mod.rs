//! Embedding generation
//!
//! One in-process model behind the `Embedder` trait. The embedding model is
//! CPU-bound, so all computation funnels through a single dedicated worker
//! thread that owns the model; async callers queue batches and await the
//! reply. The worker probes the model's output dimension at startup and
//! refuses to run against a config that disagrees, so a dimension mismatch
//! surfaces as a startup error instead of corrupt index writes.

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Trait for embedding backends
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; deterministic for identical input
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension
    fn dimension(&self) -> usize;

    /// Model identifier
    fn model_name(&self) -> &str;
}

/// Embed a single text
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(vec![text.to_string()]).await?;
    if vectors.len() != 1 {
        return Err(Error::Embedding(format!(
            "expected exactly one vector from '{}', got {}",
            embedder.model_name(),
            vectors.len()
        )));
    }
    Ok(vectors.remove(0))
}

/// Embed many texts in bounded batches, preserving input order
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let mut all = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(batch_size) {
        let vectors = embedder.embed(chunk.to_vec()).await?;
        if vectors.len() != chunk.len() {
            return Err(Error::Embedding(format!(
                "batch of {} texts came back as {} vectors",
                chunk.len(),
                vectors.len()
            )));
        }
        all.extend(vectors);
    }
    Ok(all)
}

/// Create the configured embedder
pub fn create_embedder(config: &EmbeddingConfig) -> Result<std::sync::Arc<dyn Embedder>> {
    #[cfg(feature = "local-embed")]
    {
        Ok(std::sync::Arc::new(LocalEmbedder::spawn(config)?))
    }

    #[cfg(not(feature = "local-embed"))]
    {
        let _ = config;
        Err(Error::Embedding(
            "no embedding backend available; enable the 'local-embed' feature".to_string(),
        ))
    }
}

#[cfg(feature = "local-embed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embed")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tokio::sync::{mpsc, oneshot};
    use tracing::info;

    /// Model aliases this backend accepts
    const SUPPORTED_MODELS: &[&str] = &[
        "BAAI/bge-small-en-v1.5",
        "BAAI/bge-base-en-v1.5",
        "BAAI/bge-large-en-v1.5",
        "sentence-transformers/all-MiniLM-L6-v2",
    ];

    fn resolve_backend(model_id: &str) -> Result<EmbeddingModel> {
        let backend = match model_id {
            "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "BAAI/bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
            "sentence-transformers/all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            other => {
                return Err(Error::Config(format!(
                    "unsupported embedding model '{}'; supported: {}",
                    other,
                    SUPPORTED_MODELS.join(", ")
                )))
            }
        };
        Ok(backend)
    }

    /// One queued unit of embedding work
    struct EmbedJob {
        texts: Vec<String>,
        reply: oneshot::Sender<Result<Vec<Vec<f32>>>>,
    }

    /// In-process embedder backed by one worker thread.
    ///
    /// The thread owns the fastembed model for its whole life; when the last
    /// handle drops, the job channel closes and the thread exits.
    pub struct LocalEmbedder {
        jobs: mpsc::UnboundedSender<EmbedJob>,
        model_name: String,
        dimension: usize,
    }

    impl LocalEmbedder {
        /// Load the model on a dedicated worker thread and verify its output
        /// dimension against the configuration.
        pub fn spawn(config: &EmbeddingConfig) -> Result<Self> {
            let backend = resolve_backend(&config.model)?;
            let model_id = config.model.clone();

            let (jobs, mut job_rx) = mpsc::unbounded_channel::<EmbedJob>();
            let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<usize>>(1);

            info!("Starting embedding worker for {}", model_id);
            std::thread::Builder::new()
                .name("embedding-worker".to_string())
                .spawn(move || {
                    let model = match TextEmbedding::try_new(InitOptions::new(backend)) {
                        Ok(model) => model,
                        Err(e) => {
                            let _ = ready_tx
                                .send(Err(Error::Embedding(format!("model init: {}", e))));
                            return;
                        }
                    };

                    // Probe the real output dimension before accepting work
                    let probed = model
                        .embed(vec!["dimension probe".to_string()], None)
                        .map(|mut vectors| vectors.pop().map(|v| v.len()).unwrap_or(0))
                        .map_err(|e| Error::Embedding(format!("probe: {}", e)));
                    let failed = probed.is_err();
                    let _ = ready_tx.send(probed);
                    if failed {
                        return;
                    }

                    while let Some(job) = job_rx.blocking_recv() {
                        let result = model
                            .embed(job.texts, None)
                            .map_err(|e| Error::Embedding(format!("embed: {}", e)));
                        let _ = job.reply.send(result);
                    }
                })?;

            let probed = ready_rx
                .recv()
                .map_err(|_| Error::Embedding("embedding worker died during init".to_string()))??;
            if probed != config.dimension {
                return Err(Error::Config(format!(
                    "embedding model '{}' produces {}-dimensional vectors, \
                     but the config declares {}",
                    model_id, probed, config.dimension
                )));
            }

            Ok(Self {
                jobs,
                model_name: model_id,
                dimension: probed,
            })
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let (reply, reply_rx) = oneshot::channel();
            self.jobs
                .send(EmbedJob { texts, reply })
                .map_err(|_| Error::Embedding("embedding worker exited".to_string()))?;
            reply_rx
                .await
                .map_err(|_| Error::Embedding("embedding worker dropped a job".to_string()))?
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the size of every batch it receives; encodes the text's
    /// numeric value into the vector so order is observable.
    struct RecordingEmbedder {
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl RecordingEmbedder {
        fn new() -> Self {
            Self {
                batch_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            self.batch_sizes.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| vec![t.parse::<f32>().unwrap_or(-1.0)])
                .collect())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "recording-test"
        }
    }

    /// Misbehaving backend that swallows its input
    struct SilentEmbedder;

    #[async_trait]
    impl Embedder for SilentEmbedder {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "silent-test"
        }
    }

    #[tokio::test]
    async fn test_embed_in_batches_respects_batch_size() {
        let embedder = RecordingEmbedder::new();
        let texts: Vec<String> = (0..10).map(|i| i.to_string()).collect();

        let vectors = embed_in_batches(&embedder, texts, 4).await.unwrap();

        assert_eq!(*embedder.batch_sizes.lock().unwrap(), vec![4, 4, 2]);
        assert_eq!(vectors.len(), 10);
        // Order preserved across batch boundaries
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], i as f32);
        }
    }

    #[tokio::test]
    async fn test_embed_in_batches_zero_batch_size_clamped() {
        let embedder = RecordingEmbedder::new();
        let texts = vec!["0".to_string(), "1".to_string()];

        let vectors = embed_in_batches(&embedder, texts, 0).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(embedder
            .batch_sizes
            .lock()
            .unwrap()
            .iter()
            .all(|&size| size == 1));
    }

    #[tokio::test]
    async fn test_embed_in_batches_rejects_short_reply() {
        let texts = vec!["0".to_string(), "1".to_string()];
        let err = embed_in_batches(&SilentEmbedder, texts, 8).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_embed_one() {
        let embedder = RecordingEmbedder::new();
        let vector = embed_one(&embedder, "7").await.unwrap();
        assert_eq!(vector, vec![7.0]);

        assert!(embed_one(&SilentEmbedder, "7").await.is_err());
    }
}
