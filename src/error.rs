//! Custom error types for newsbrief

use std::time::Duration;
use thiserror::Error;

/// Main error type for newsbrief operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch failed for source '{source_name}': {message}")]
    Fetch {
        source_name: String,
        kind: FetchErrorKind,
        retriable: bool,
        message: String,
    },

    #[error("Model error: {0}")]
    Model(ModelError),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Mail transport error: {0}")]
    Transport(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// How an adapter fetch went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    Http,
    Parse,
    Timeout,
    Render,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchErrorKind::Network => write!(f, "network"),
            FetchErrorKind::Http => write!(f, "http"),
            FetchErrorKind::Parse => write!(f, "parse"),
            FetchErrorKind::Timeout => write!(f, "timeout"),
            FetchErrorKind::Render => write!(f, "render"),
        }
    }
}

/// A failure reported by the language-model endpoint
#[derive(Debug, Clone)]
pub struct ModelError {
    pub failure: ModelFailure,
    pub message: String,
}

/// Failure classes for model calls; the first three are retried
#[derive(Debug, Clone, PartialEq)]
pub enum ModelFailure {
    /// Provider throttled the call; honor the retry-after hint when present
    RateLimited { retry_after: Option<Duration> },
    /// Network / 5xx / truncated reply
    Transient,
    /// Reply did not parse into the expected schema
    Invalid,
    /// 4xx or otherwise unrecoverable; fails the item, not the run
    Permanent,
}

impl ModelError {
    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self {
            failure: ModelFailure::RateLimited { retry_after },
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            failure: ModelFailure::Transient,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            failure: ModelFailure::Invalid,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            failure: ModelFailure::Permanent,
            message: message.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        !matches!(self.failure, ModelFailure::Permanent)
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.failure {
            ModelFailure::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "rate limited (retry after {:?}): {}", d, self.message),
                None => write!(f, "rate limited: {}", self.message),
            },
            ModelFailure::Transient => write!(f, "transient: {}", self.message),
            ModelFailure::Invalid => write!(f, "invalid reply: {}", self.message),
            ModelFailure::Permanent => write!(f, "permanent: {}", self.message),
        }
    }
}

impl Error {
    /// Build a retriable fetch error
    pub fn fetch_retriable(
        source_name: impl Into<String>,
        kind: FetchErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Error::Fetch {
            source_name: source_name.into(),
            kind,
            retriable: true,
            message: message.into(),
        }
    }

    /// Build a non-retriable fetch error
    pub fn fetch_fatal(
        source_name: impl Into<String>,
        kind: FetchErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Error::Fetch {
            source_name: source_name.into(),
            kind,
            retriable: false,
            message: message.into(),
        }
    }

    /// Whether retrying this error could succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Fetch { retriable, .. } => *retriable,
            Error::Model(e) => e.is_retriable(),
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Short machine-readable label used in run-record failure counters
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Fetch { .. } => "fetch",
            Error::Model(_) => "model",
            Error::Store(_) => "store",
            Error::Index(_) | Error::Embedding(_) => "index",
            Error::Render(_) => "render",
            Error::Transport(_) => "transport",
            Error::Cancelled => "cancelled",
            _ => "other",
        }
    }
}

/// Result type alias for newsbrief operations
pub type Result<T> = std::result::Result<T, Error>;
