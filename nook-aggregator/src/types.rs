use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
// Shared data model lives in the interfaces crate
pub use interfaces::defs::{Item, ItemKey, Metadata, Source};
pub use interfaces::query::ContentQuery;

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub fetch_time: DateTime<Utc>,
    pub response_time_ms: u64,
    pub http_status: u16,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_body_size_mb: usize,
    pub max_redirects: usize,
    /// Minimum spacing between two requests to the same host.
    pub min_host_interval_ms: u64,
    /// Upper bound for one source's whole fetch step.
    pub lane_timeout_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Nook-Aggregator/1.0".to_string(),
            timeout_seconds: 30,
            max_body_size_mb: 10,
            max_redirects: 5,
            min_host_interval_ms: 1000,
            lane_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("source {origin} unreachable: {reason}")]
    SourceUnreachable { origin: Source, reason: String },

    #[error("malformed {origin} record: {reason}")]
    ItemMalformed { origin: Source, reason: String },

    #[error("generation unavailable: {reason}")]
    GenerationUnavailable { reason: String },

    #[error("failed to write partition {}: {reason}", .path.display())]
    StoreWriteFailed { path: PathBuf, reason: String },

    #[error("failed to read partition {}: {reason}", .path.display())]
    StoreReadFailed { path: PathBuf, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Response too large: {size_mb}MB")]
    ResponseTooLarge { size_mb: usize },

    #[error("Timed out after {seconds}s: {what}")]
    Timeout { what: String, seconds: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

impl AggregatorError {
    pub fn unreachable(source: Source, reason: impl ToString) -> Self {
        AggregatorError::SourceUnreachable {
            origin: source,
            reason: reason.to_string(),
        }
    }

    pub fn malformed(source: Source, reason: impl ToString) -> Self {
        AggregatorError::ItemMalformed {
            origin: source,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
