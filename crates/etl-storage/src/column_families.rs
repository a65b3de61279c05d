//! Column family definitions for RocksDB.
//!
//! - checkpoints: one JSON record per logical state key (default compaction)
//! - pending: members of pending-id sets, one key per member

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for checkpoint records
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// Column family name for pending-id set members
pub const CF_PENDING: &str = "pending";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_CHECKPOINTS, CF_PENDING];

/// Pending members are written and deleted in bursts every cycle.
fn pending_options() -> Options {
    let mut opts = Options::default();
    opts.set_level_compaction_dynamic_level_bytes(true);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_PENDING, pending_options()),
    ]
}
