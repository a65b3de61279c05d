//! RocksDB wrapper for sync state.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Checkpoint records (one key per logical record, overwrite in place)
//! - Pending-id sets with idempotent add and ordered paging
//! - Batched removal of drained members

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use tracing::{debug, info};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_CHECKPOINTS, CF_PENDING};
use crate::error::StorageError;
use crate::keys::{CheckpointKey, PendingKey};

/// Main storage interface for the sync worker
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(2);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Checkpoint Methods ====================

    /// Overwrite a checkpoint record
    pub fn put_checkpoint(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let key = CheckpointKey::new(name);
        self.db.put_cf(cf, key.to_bytes(), bytes)?;
        Ok(())
    }

    /// Read a checkpoint record, `None` if never written
    pub fn get_checkpoint(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let key = CheckpointKey::new(name);
        Ok(self.db.get_cf(cf, key.to_bytes())?)
    }

    // ==================== Pending Set Methods ====================

    /// Add one member to a pending set. Adding an existing member is a no-op.
    pub fn add_pending(&self, set: &str, member: &str) -> Result<(), StorageError> {
        let cf = self.cf(CF_PENDING)?;
        self.db
            .put_cf(cf, PendingKey::new(set, member).to_bytes(), b"")?;
        Ok(())
    }

    /// Add several members in one atomic write.
    pub fn add_pending_many<I, S>(&self, set: &str, members: I) -> Result<usize, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cf = self.cf(CF_PENDING)?;
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for member in members {
            batch.put_cf(cf, PendingKey::new(set, member.as_ref()).to_bytes(), b"");
            count += 1;
        }
        if count > 0 {
            self.db.write(batch)?;
            debug!(set = %set, count, "Added pending members");
        }
        Ok(count)
    }

    /// Read up to `limit` members of a set in ascending key order,
    /// starting strictly after `after` when given.
    pub fn pending_page(
        &self,
        set: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let cf = self.cf(CF_PENDING)?;
        let prefix = PendingKey::set_prefix(set);
        let start = match after {
            Some(member) => PendingKey::new(set, member).to_bytes(),
            None => prefix.clone(),
        };

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut results = Vec::with_capacity(limit);
        for item in iter {
            if results.len() >= limit {
                break;
            }
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            // The seek lands on `after` itself when it is still stored
            if key.as_ref() == start.as_slice() && after.is_some() {
                continue;
            }
            results.push(PendingKey::from_bytes(&key)?.member);
        }

        Ok(results)
    }

    /// Remove exactly the given members. Missing members are ignored.
    pub fn remove_pending<I, S>(&self, set: &str, members: I) -> Result<usize, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cf = self.cf(CF_PENDING)?;
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for member in members {
            batch.delete_cf(cf, PendingKey::new(set, member.as_ref()).to_bytes());
            count += 1;
        }
        if count > 0 {
            self.db.write(batch)?;
            debug!(set = %set, count, "Removed pending members");
        }
        Ok(count)
    }

    /// Number of members currently in a set
    pub fn pending_count(&self, set: &str) -> Result<u64, StorageError> {
        let cf = self.cf(CF_PENDING)?;
        let prefix = PendingKey::set_prefix(set);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut count = 0u64;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();

        if let Some(cf) = self.db.cf_handle(CF_CHECKPOINTS) {
            stats.checkpoint_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_PENDING) {
            stats.pending_count = self.count_cf_entries(cf)?;
        }
        stats.disk_usage_bytes = self.get_disk_usage();

        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of checkpoint records
    pub checkpoint_count: u64,
    /// Members across all pending sets
    pub pending_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.get_checkpoint("etl_state").unwrap().is_none());

        storage.put_checkpoint("etl_state", b"first").unwrap();
        storage.put_checkpoint("etl_state", b"second").unwrap();

        let stored = storage.get_checkpoint("etl_state").unwrap().unwrap();
        assert_eq!(stored, b"second".to_vec());
    }

    #[test]
    fn test_add_pending_is_idempotent() {
        let (storage, _temp) = create_test_storage();
        storage.add_pending("movie_ids", "a").unwrap();
        storage.add_pending("movie_ids", "a").unwrap();
        storage.add_pending_many("movie_ids", ["a", "b"]).unwrap();

        assert_eq!(storage.pending_count("movie_ids").unwrap(), 2);
    }

    #[test]
    fn test_pending_sets_are_isolated() {
        let (storage, _temp) = create_test_storage();
        storage.add_pending_many("movie_ids", ["a", "b"]).unwrap();
        storage.add_pending("movie", "z").unwrap();

        assert_eq!(storage.pending_count("movie_ids").unwrap(), 2);
        assert_eq!(storage.pending_count("movie").unwrap(), 1);
        assert_eq!(
            storage.pending_page("movie_ids", None, 10).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_pending_page_walks_every_member_once() {
        let (storage, _temp) = create_test_storage();
        let members: Vec<String> = (0..25).map(|i| format!("id-{:03}", i)).collect();
        storage.add_pending_many("movie_ids", &members).unwrap();

        let mut seen = Vec::new();
        let mut after: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = storage
                .pending_page("movie_ids", after.as_deref(), 10)
                .unwrap();
            if page.is_empty() {
                break;
            }
            pages += 1;
            after = page.last().cloned();
            seen.extend(page);
        }

        assert_eq!(pages, 3);
        assert_eq!(seen, members);
    }

    #[test]
    fn test_pending_page_after_removed_member() {
        let (storage, _temp) = create_test_storage();
        storage.add_pending_many("movie_ids", ["a", "b", "c"]).unwrap();
        storage.remove_pending("movie_ids", ["b"]).unwrap();

        let page = storage.pending_page("movie_ids", Some("b"), 10).unwrap();
        assert_eq!(page, vec!["c".to_string()]);
    }

    #[test]
    fn test_remove_pending_only_named_members() {
        let (storage, _temp) = create_test_storage();
        storage.add_pending_many("movie_ids", ["a", "b", "c"]).unwrap();

        storage.remove_pending("movie_ids", ["a", "c", "missing"]).unwrap();

        assert_eq!(
            storage.pending_page("movie_ids", None, 10).unwrap(),
            vec!["b".to_string()]
        );
    }

    #[test]
    fn test_pending_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            storage.add_pending("movie_ids", "kept").unwrap();
            storage.flush().unwrap();
        }
        let storage = Storage::open(temp_dir.path()).unwrap();
        assert_eq!(storage.pending_count("movie_ids").unwrap(), 1);
    }

    #[test]
    fn test_get_stats() {
        let (storage, _temp) = create_test_storage();
        storage.put_checkpoint("etl_state", b"{}").unwrap();
        storage.add_pending_many("movie_ids", ["a", "b"]).unwrap();

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.checkpoint_count, 1);
        assert_eq!(stats.pending_count, 2);
    }
}
