//! Durable "last processed" watermark.
//!
//! One record under [`STATE_KEY`] holding `{"last_updated": <RFC 3339>}`.
//! The stored value only moves forward: an older timestamp handed to
//! [`CheckpointStore::set`] is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::ready;
use std::sync::Arc;
use tracing::{debug, info, warn};

use etl_storage::{Storage, StorageError};

use crate::error::PipelineError;
use crate::retry::RetryPolicy;

/// Storage key of the sync state record.
pub const STATE_KEY: &str = "etl_state";

/// Watermark used before the first successful cycle: 0001-01-01T00:00:00Z.
///
/// Earlier than any real row and still inside PostgreSQL's timestamp range.
pub fn min_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(-62_135_596_800, 0).unwrap_or_default()
}

/// Persisted sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_updated: DateTime<Utc>,
}

impl SyncState {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec(self).map_err(PipelineError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::Checkpoint(format!("corrupt sync state: {}", e)))
    }
}

/// Reads and advances the watermark.
pub struct CheckpointStore {
    storage: Arc<Storage>,
    retry: RetryPolicy,
}

impl CheckpointStore {
    pub fn new(storage: Arc<Storage>, retry: RetryPolicy) -> Self {
        Self { storage, retry }
    }

    /// Current watermark, or [`min_timestamp`] if none was ever stored.
    pub async fn get(&self) -> Result<DateTime<Utc>, PipelineError> {
        let bytes = self
            .retry
            .run("checkpoint.get", StorageError::is_transient, || {
                ready(self.storage.get_checkpoint(STATE_KEY))
            })
            .await?;

        match bytes {
            Some(bytes) => Ok(SyncState::from_bytes(&bytes)?.last_updated),
            None => {
                debug!("No checkpoint stored, starting from the beginning");
                Ok(min_timestamp())
            }
        }
    }

    /// Store `timestamp` unless it is older than the stored value.
    ///
    /// Returns whether the stored watermark changed.
    pub async fn set(&self, timestamp: DateTime<Utc>) -> Result<bool, PipelineError> {
        let current = self.get().await?;
        if timestamp < current {
            warn!(
                current = %current,
                requested = %timestamp,
                "Refusing to move checkpoint backwards"
            );
            return Ok(false);
        }

        let bytes = SyncState {
            last_updated: timestamp,
        }
        .to_bytes()?;
        self.retry
            .run("checkpoint.set", StorageError::is_transient, || {
                ready(self.storage.put_checkpoint(STATE_KEY, &bytes))
            })
            .await?;

        info!(last_updated = %timestamp, "Checkpoint advanced");
        Ok(true)
    }
}
