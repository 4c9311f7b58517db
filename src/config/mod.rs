//! Configuration management for newsbrief
//!
//! Handles loading, saving, and validating configuration from TOML files.
//! Secrets (model API key, SMTP password) are never stored in the file;
//! the config names the environment variables that hold them.

mod catalog;
mod defaults;

pub use catalog::*;
pub use defaults::*;

use crate::error::{Error, Result};
use crate::profile::UserProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Digest run parameters
    #[serde(default)]
    pub digest: DigestConfig,

    /// Worker pool sizes
    #[serde(default)]
    pub pools: PoolConfig,

    /// Per-operation timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry budgets
    #[serde(default)]
    pub retries: RetryConfig,

    /// Language-model endpoint configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Record store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Outbound mail configuration
    #[serde(default)]
    pub mail: MailConfig,

    /// Recipient profile used for ranking and email composition
    #[serde(default)]
    pub profile: UserProfile,

    /// Source catalog; empty means the built-in default catalog
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

/// Digest run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Default scraping window in hours
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,

    /// Ranked items to email
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Render the digest without submitting mail
    #[serde(default)]
    pub skip_email: bool,

    /// Character budget for summarization input
    #[serde(default = "default_summary_input_budget")]
    pub summary_input_budget: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            top_n: default_top_n(),
            skip_email: false,
            summary_input_budget: default_summary_input_budget(),
        }
    }
}

/// Worker pool sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Concurrent source adapters
    #[serde(default = "default_pool_fetch")]
    pub fetch: usize,

    /// Concurrent headless-browser renders
    #[serde(default = "default_pool_render")]
    pub render: usize,

    /// Concurrent model calls (summaries + ranking + intro share this)
    #[serde(default = "default_pool_llm")]
    pub llm: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fetch: default_pool_fetch(),
            render: default_pool_render(),
            llm: default_pool_llm(),
        }
    }
}

/// Per-operation timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_fetch_secs")]
    pub fetch_secs: u64,

    #[serde(default = "default_timeout_render_secs")]
    pub render_secs: u64,

    #[serde(default = "default_timeout_llm_secs")]
    pub llm_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: default_timeout_fetch_secs(),
            render_secs: default_timeout_render_secs(),
            llm_secs: default_timeout_llm_secs(),
        }
    }
}

/// Retry budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retriable adapter failures
    #[serde(default = "default_retries_fetch")]
    pub fetch: u32,

    /// Malformed model replies
    #[serde(default = "default_retries_parse")]
    pub parse: u32,

    /// Rate-limited / transient model failures
    #[serde(default = "default_retries_model")]
    pub model: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch: default_retries_fetch(),
            parse: default_retries_parse(),
            model: default_retries_model(),
        }
    }
}

/// Language-model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Chat-completions endpoint URL
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the API key
    #[serde(default = "default_model_api_key_env")]
    pub api_key_env: String,

    /// Model id for digest summaries
    #[serde(default = "default_model_digest")]
    pub digest_model: String,

    /// Model id for ranking
    #[serde(default = "default_model_rank")]
    pub rank_model: String,

    /// Model id for email intro composition
    #[serde(default = "default_model_email")]
    pub email_model: String,

    #[serde(default = "default_temperature_digest")]
    pub digest_temperature: f32,

    #[serde(default = "default_temperature_rank")]
    pub rank_temperature: f32,

    #[serde(default = "default_temperature_email")]
    pub email_temperature: f32,

    /// Completion token cap per call
    #[serde(default = "default_model_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
            api_key_env: default_model_api_key_env(),
            digest_model: default_model_digest(),
            rank_model: default_model_rank(),
            email_model: default_model_email(),
            digest_temperature: default_temperature_digest(),
            rank_temperature: default_temperature_rank(),
            email_temperature: default_temperature_email(),
            max_tokens: default_model_max_tokens(),
        }
    }
}

impl ModelConfig {
    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).map_err(|_| {
            Error::Config(format!(
                "model API key not set (expected environment variable {})",
                self.api_key_env
            ))
        })
    }
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match the deployed vector index)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding calls
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory the index persists to
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,

    /// Collection name inside the index directory
    #[serde(default = "default_index_collection")]
    pub collection: String,

    /// Cosine threshold above which a new record is a duplicate
    #[serde(default = "default_dup_threshold")]
    pub dup_threshold: f32,

    /// Neighbors retrieved per ranking call
    #[serde(default = "default_context_k")]
    pub context_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            collection: default_index_collection(),
            dup_threshold: default_dup_threshold(),
            context_k: default_context_k(),
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
        }
    }
}

/// Outbound mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// SMTP username; usually the sending address
    #[serde(default)]
    pub username: String,

    /// Environment variable holding the SMTP password
    #[serde(default = "default_smtp_password_env")]
    pub password_env: String,

    /// Digest recipient
    #[serde(default)]
    pub recipient: String,

    /// Fixed subject; generated from the date when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password_env: default_smtp_password_env(),
            recipient: String::new(),
            subject: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        if config.sources.is_empty() {
            config.sources = default_catalog();
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from the given path, or fall back to built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default_path = PathBuf::from("newsbrief.toml");
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    info!("No config file found, using built-in defaults");
                    let mut config = Config::default();
                    config.sources = default_catalog();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    /// Write the current configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Wrote config to {:?}", path);
        Ok(())
    }

    /// Startup validation; failures here are fatal
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config("source catalog is empty".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for spec in &self.sources {
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate source name '{}'",
                    spec.name
                )));
            }
            if spec.kind == SourceKind::Syndication && spec.feed_url.is_none() {
                return Err(Error::Config(format!(
                    "syndication source '{}' has no feed_url",
                    spec.name
                )));
            }
            if !spec.is_video() && spec.category.is_none() {
                return Err(Error::Config(format!(
                    "web source '{}' has no category",
                    spec.name
                )));
            }
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding dimension must be non-zero".into()));
        }
        if self.pools.fetch == 0 || self.pools.render == 0 || self.pools.llm == 0 {
            return Err(Error::Config("pool sizes must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.index.dup_threshold) {
            return Err(Error::Config(format!(
                "dup_threshold {} outside [0, 1]",
                self.index.dup_threshold
            )));
        }

        Ok(())
    }

    /// Connection pool size for the record store
    pub fn db_pool_size(&self) -> u32 {
        (self.pools.fetch + self.pools.llm) as u32
    }
}
