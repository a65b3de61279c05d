//! Search error types.

use thiserror::Error;

/// Errors that can occur talking to the search index.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Could not reach the cluster
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Cluster answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Index creation raced with another creator
    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    /// Response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Document serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client could not be built
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// HTTP statuses the cluster uses for "try again later", both for whole
/// requests and for single bulk items.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

impl SearchError {
    /// Whether the request may succeed if repeated unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Connection(_) | SearchError::Timeout(_) => true,
            SearchError::Http { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            SearchError::Connection(e.to_string())
        } else if e.is_decode() {
            SearchError::InvalidResponse(e.to_string())
        } else {
            SearchError::Connection(e.to_string())
        }
    }
}
