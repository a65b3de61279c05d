//! Search backend abstraction.
//!
//! The loader only needs four operations from the index: check existence,
//! create with a body, bulk upsert keyed by id, and count. Everything else
//! about the cluster stays behind this trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{is_retryable_status, SearchError};

/// Outcome of one document inside a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub id: String,
    pub status: u16,
    /// Rejection reason, `None` when the write succeeded
    pub error: Option<String>,
}

impl BulkItem {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: 200,
            error: None,
        }
    }

    pub fn rejected(id: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            error: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Rejected for back-pressure or an unavailable shard; the same write
    /// may succeed later.
    pub fn is_retryable(&self) -> bool {
        !self.is_ok() && is_retryable_status(self.status)
    }
}

/// Per-item results of a bulk request, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &BulkItem> {
        self.items.iter().filter(|i| !i.is_ok())
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| !i.is_ok())
    }
}

/// Index operations used by the loader.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Whether the named index exists.
    async fn index_exists(&self, index: &str) -> Result<bool, SearchError>;

    /// Create an index from a settings + mappings body.
    ///
    /// Returns `SearchError::IndexAlreadyExists` if another creator won.
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchError>;

    /// Index (create or overwrite) every `(id, source)` pair.
    async fn bulk_upsert(
        &self,
        index: &str,
        docs: &[(String, Value)],
    ) -> Result<BulkResponse, SearchError>;

    /// Number of documents in the index.
    async fn count(&self, index: &str) -> Result<u64, SearchError>;
}
