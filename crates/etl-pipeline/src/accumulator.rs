//! Durable set of root ids waiting to be rebuilt.
//!
//! Ids are added while tables are scanned and drained page by page
//! afterwards. Reading never removes anything: the caller clears exactly
//! the ids it drained once every page has been loaded, so a crash
//! mid-drain leaves the whole set for the next cycle.

use std::future::ready;
use std::sync::Arc;
use tracing::debug;

use etl_storage::{Storage, StorageError};

use crate::error::PipelineError;
use crate::retry::RetryPolicy;

/// Name of the pending set holding film work ids.
pub const MOVIE_IDS: &str = "movie_ids";

pub struct PendingIds {
    storage: Arc<Storage>,
    set: String,
    page_size: usize,
    retry: RetryPolicy,
}

impl PendingIds {
    pub fn new(
        storage: Arc<Storage>,
        set: impl Into<String>,
        page_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            set: set.into(),
            page_size: page_size.max(1),
            retry,
        }
    }

    /// Add one id; adding an id already present changes nothing.
    pub async fn add(&self, id: &str) -> Result<(), PipelineError> {
        self.retry
            .run("pending.add", StorageError::is_transient, || {
                ready(self.storage.add_pending(&self.set, id))
            })
            .await?;
        Ok(())
    }

    /// Add a batch of ids in one write.
    pub async fn add_many(&self, ids: &[String]) -> Result<usize, PipelineError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let added = self
            .retry
            .run("pending.add_many", StorageError::is_transient, || {
                ready(self.storage.add_pending_many(&self.set, ids))
            })
            .await?;
        debug!(set = %self.set, count = added, "Accumulated pending ids");
        Ok(added)
    }

    /// Next page of ids in ascending order, starting after `after`.
    ///
    /// An empty page means the set has been walked to the end.
    pub async fn read_page(&self, after: Option<&str>) -> Result<Vec<String>, PipelineError> {
        let page = self
            .retry
            .run("pending.read_page", StorageError::is_transient, || {
                ready(self.storage.pending_page(&self.set, after, self.page_size))
            })
            .await?;
        Ok(page)
    }

    /// Remove exactly these ids.
    pub async fn clear(&self, ids: &[String]) -> Result<usize, PipelineError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = self
            .retry
            .run("pending.clear", StorageError::is_transient, || {
                ready(self.storage.remove_pending(&self.set, ids))
            })
            .await?;
        debug!(set = %self.set, count = removed, "Cleared pending ids");
        Ok(removed)
    }

    /// Number of ids currently pending.
    pub async fn len(&self) -> Result<u64, PipelineError> {
        let count = self
            .retry
            .run("pending.len", StorageError::is_transient, || {
                ready(self.storage.pending_count(&self.set))
            })
            .await?;
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool, PipelineError> {
        Ok(self.len().await? == 0)
    }
}
