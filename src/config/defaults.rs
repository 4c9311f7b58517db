//! Default values for configuration

use std::path::PathBuf;

/// Default scraping window in hours
pub fn default_window_hours() -> i64 {
    24
}

/// Default number of ranked items in the digest email
pub fn default_top_n() -> usize {
    10
}

/// Default character budget for summarization input
pub fn default_summary_input_budget() -> usize {
    12_000
}

/// Default fetch pool size (concurrent source adapters)
pub fn default_pool_fetch() -> usize {
    8
}

/// Default render pool size (headless-browser pages are memory-heavy)
pub fn default_pool_render() -> usize {
    2
}

/// Default model pool size (shared across summarize/rank/intro calls)
pub fn default_pool_llm() -> usize {
    4
}

/// Default per-adapter fetch timeout in seconds
pub fn default_timeout_fetch_secs() -> u64 {
    120
}

/// Default per-page render timeout in seconds
pub fn default_timeout_render_secs() -> u64 {
    60
}

/// Default per-call model timeout in seconds
pub fn default_timeout_llm_secs() -> u64 {
    60
}

/// Default retry budget for retriable adapter failures
pub fn default_retries_fetch() -> u32 {
    3
}

/// Default retry budget for malformed model replies
pub fn default_retries_parse() -> u32 {
    2
}

/// Default attempt budget for rate-limited / transient model calls
pub fn default_retries_model() -> u32 {
    3
}

/// Default model endpoint (OpenAI-compatible chat completions)
pub fn default_model_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

/// Default environment variable holding the model API key
pub fn default_model_api_key_env() -> String {
    "NEWSBRIEF_MODEL_API_KEY".to_string()
}

/// Default model id for digest summaries
pub fn default_model_digest() -> String {
    "gpt-4o-mini".to_string()
}

/// Default model id for ranking
pub fn default_model_rank() -> String {
    "gpt-4o-mini".to_string()
}

/// Default model id for email intro composition
pub fn default_model_email() -> String {
    "gpt-4o-mini".to_string()
}

/// Default temperature for digest summaries
pub fn default_temperature_digest() -> f32 {
    0.7
}

/// Default temperature for ranking (lower for stable scores)
pub fn default_temperature_rank() -> f32 {
    0.3
}

/// Default temperature for email intro composition
pub fn default_temperature_email() -> f32 {
    0.7
}

/// Default completion token cap
pub fn default_model_max_tokens() -> usize {
    1024
}

/// Default embedding model (BAAI/bge-small-en-v1.5)
pub fn default_embedding_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

/// Default embedding dimension for bge-small-en-v1.5
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default vector index directory
pub fn default_index_dir() -> PathBuf {
    PathBuf::from("./newsbrief_index")
}

/// Default vector collection name
pub fn default_index_collection() -> String {
    "newsbrief_articles".to_string()
}

/// Default near-duplicate cosine threshold (unvalidated; config knob on purpose)
pub fn default_dup_threshold() -> f32 {
    0.95
}

/// Default number of retrieved neighbors per ranking call
pub fn default_context_k() -> usize {
    5
}

/// Default SQLite database file
pub fn default_db_file() -> PathBuf {
    PathBuf::from("./newsbrief.db")
}

/// Default SMTP host
pub fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

/// Default SMTP submission port
pub fn default_smtp_port() -> u16 {
    587
}

/// Default environment variable holding the SMTP password
pub fn default_smtp_password_env() -> String {
    "NEWSBRIEF_SMTP_PASSWORD".to_string()
}

/// Default HTTP user agent
pub fn default_user_agent() -> String {
    format!("newsbrief/{} (News Digest Engine)", env!("CARGO_PKG_VERSION"))
}
