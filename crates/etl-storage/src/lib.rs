//! Durable state for the sync worker.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for checkpoints and pending-id sets
//! - Single-key checkpoint records, overwritten in place
//! - Set semantics for pending ids (one key per member, idempotent add)
//! - Ordered paging over set members for restartable drains

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{CheckpointKey, PendingKey};
