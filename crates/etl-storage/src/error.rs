//! Storage layer error types.

use rocksdb::ErrorKind;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Busy/locked files, timeouts and I/O hiccups are transient; corruption,
    /// bad keys and missing column families are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::RocksDb(e) => matches!(
                e.kind(),
                ErrorKind::Busy
                    | ErrorKind::TryAgain
                    | ErrorKind::TimedOut
                    | ErrorKind::Incomplete
                    | ErrorKind::IOError
            ),
            StorageError::ColumnFamilyNotFound(_) | StorageError::Key(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_errors_are_not_transient() {
        assert!(!StorageError::Key("bad".into()).is_transient());
        assert!(!StorageError::ColumnFamilyNotFound("pending".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::ColumnFamilyNotFound("pending".into());
        assert_eq!(err.to_string(), "Column family not found: pending");
    }
}
