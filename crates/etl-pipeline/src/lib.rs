//! Incremental sync pipeline from the relational store to the search index.
//!
//! ## Key Components
//!
//! - [`CheckpointStore`]: durable "last processed" watermark
//! - [`PendingIds`]: durable set of film work ids awaiting a rebuild
//! - [`ChangeExtractor`]: keyset scans of changed rows, dependent to root id resolution
//! - [`DocumentAssembler`]: folds flattened join rows into nested movie documents
//! - [`IndexLoader`]: schema bootstrap and validated bulk upserts
//! - [`SyncOrchestrator`]: runs one cycle after another until shutdown
//! - [`RetryPolicy`]: exponential backoff around every remote call
//!
//! ## Cycle
//!
//! 1. Read the watermark and scan `film_work`, `person`, `genre` after it
//! 2. Load changed persons and genres straight into their indices
//! 3. Record every affected film work id in the pending set
//! 4. Drain the pending set page by page: assemble, then bulk upsert
//! 5. Clear the drained ids and move the watermark to "now"
//!
//! ## Example
//!
//! ```ignore
//! use etl_pipeline::{RetryPolicy, SyncConfig, SyncOrchestrator};
//!
//! let mut orchestrator = SyncOrchestrator::new(storage, source, backend, SyncConfig::default(), RetryPolicy::default());
//! orchestrator.run(tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

pub mod accumulator;
pub mod assemble;
pub mod checkpoint;
pub mod error;
pub mod extract;
pub mod loader;
pub mod orchestrator;
pub mod retry;
pub mod source;

pub use accumulator::{PendingIds, MOVIE_IDS};
pub use assemble::{assemble, DocumentAssembler};
pub use checkpoint::{min_timestamp, CheckpointStore, SyncState, STATE_KEY};
pub use error::PipelineError;
pub use extract::{ChangeExtractor, TableScan};
pub use loader::{IndexLoader, LoadFailure, LoadReport};
pub use orchestrator::{CycleOutcome, CycleStats, SyncConfig, SyncOrchestrator, SyncPhase};
pub use retry::RetryPolicy;
pub use source::{ChangeSource, MemorySource, PostgresSource, PostgresSourceConfig, SourceError};
