//! End-to-end test infrastructure for the movies ETL.
//!
//! Wires the real pipeline to an in-memory change source, an in-memory
//! search backend and a RocksDB state store in a temp directory.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use etl_pipeline::{
    ChangeSource, CheckpointStore, MemorySource, PendingIds, RetryPolicy, SyncConfig,
    SyncOrchestrator, MOVIE_IDS,
};
use etl_search::{MemoryBackend, SearchBackend};
use etl_storage::Storage;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub db_path: PathBuf,
    pub storage: Arc<Storage>,
    pub source: Arc<MemorySource>,
    pub backend: Arc<MemoryBackend>,
}

impl TestHarness {
    /// Create a new harness with empty tables, no indices and fresh state.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("state");
        let storage = Arc::new(Storage::open(&db_path).expect("Failed to open test storage"));

        Self {
            _temp_dir: temp_dir,
            db_path,
            storage,
            source: Arc::new(MemorySource::new()),
            backend: Arc::new(MemoryBackend::new()),
        }
    }

    /// Orchestrator over the harness collaborators.
    pub fn orchestrator(&self, batch_size: usize) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.source) as Arc<dyn ChangeSource>,
            Arc::clone(&self.backend) as Arc<dyn SearchBackend>,
            SyncConfig::default().with_batch_size(batch_size),
            RetryPolicy::default(),
        )
    }

    pub fn checkpoint(&self) -> CheckpointStore {
        CheckpointStore::new(Arc::clone(&self.storage), RetryPolicy::default())
    }

    pub fn pending(&self) -> PendingIds {
        PendingIds::new(
            Arc::clone(&self.storage),
            MOVIE_IDS,
            100,
            RetryPolicy::default(),
        )
    }

    /// Close and reopen the state store, as a process restart would.
    ///
    /// Every orchestrator built from this harness must be dropped first.
    pub fn restart(mut self) -> Self {
        drop(self.storage);
        self.storage =
            Arc::new(Storage::open(&self.db_path).expect("Failed to reopen test storage"));
        self
    }

    /// Stored movie document, panicking if it is missing.
    pub async fn movie(&self, id: &str) -> Value {
        self.backend
            .document("movies", id)
            .await
            .unwrap_or_else(|| panic!("movie {} not indexed", id))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic UUID: `prefix` picks the entity family, `n` the member.
pub fn test_uuid(prefix: u8, n: u32) -> String {
    format!("{:02x}000000-0000-4000-8000-{:012}", prefix, n)
}

/// Timestamp `minutes` after a fixed base.
pub fn ts(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base timestamp")
        + Duration::minutes(minutes)
}

/// Timestamp safely after any checkpoint written by a cycle that just ran.
pub fn after_now() -> DateTime<Utc> {
    Utc::now() + Duration::minutes(1)
}

/// Names held in a JSON string array field.
pub fn names(doc: &Value, field: &str) -> Vec<String> {
    doc[field]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
