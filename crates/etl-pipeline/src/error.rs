//! Error types for the sync pipeline.

use etl_search::SearchError;
use etl_storage::StorageError;
use thiserror::Error;

use crate::source::SourceError;

/// Errors that can occur while running a sync cycle
#[derive(Error, Debug)]
pub enum PipelineError {
    /// State store operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search index operation failed
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Relational source operation failed
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Stored checkpoint could not be decoded
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Whether the failed step may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Storage(e) => e.is_transient(),
            PipelineError::Search(e) => e.is_transient(),
            PipelineError::Source(e) => e.is_transient(),
            PipelineError::Checkpoint(_) | PipelineError::Serialization(_) => false,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
