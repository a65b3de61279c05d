//! Relational change source.
//!
//! The extractor and assembler talk to the relational store only through
//! [`ChangeSource`]. `PostgresSource` is the production implementation;
//! `MemorySource` backs tests and local runs.

mod memory;
mod postgres;

pub use memory::MemorySource;
pub use postgres::{PostgresSource, PostgresSourceConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use etl_types::{ChangedRow, JoinRow, RowCursor, Table};

/// Errors raised by a change source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection lost, refused or timed out
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Query rejected by the database
    #[error("Query failed: {0}")]
    Query(String),

    /// A row did not have the expected shape
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// An id handed to the source is not a valid identifier
    #[error("Invalid id: {0}")]
    InvalidId(String),

    /// Operation not defined for this table
    #[error("Unsupported table for {operation}: {table}")]
    UnsupportedTable { operation: &'static str, table: Table },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// Read access to the relational store.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Rows of `table` with `modified > since`, ordered by `(modified, id)`.
    ///
    /// With `after`, only rows strictly after that cursor are returned.
    /// At most `limit` rows come back per call.
    async fn scan_table(
        &self,
        table: Table,
        since: DateTime<Utc>,
        after: Option<&RowCursor>,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError>;

    /// Root (film work) ids linked to the given rows of a dependent table,
    /// ordered by the root's modification time, without duplicates.
    async fn resolve_root_ids(
        &self,
        table: Table,
        ids: &[String],
    ) -> Result<Vec<String>, SourceError>;

    /// Flattened film work / person / genre join rows for the given roots.
    async fn fetch_join_rows(&self, root_ids: &[String]) -> Result<Vec<JoinRow>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(SourceError::Unavailable("reset".into()).is_transient());
        assert!(!SourceError::Query("syntax".into()).is_transient());
        assert!(!SourceError::InvalidId("x".into()).is_transient());
        assert!(!SourceError::UnsupportedTable {
            operation: "resolve_root_ids",
            table: Table::FilmWork,
        }
        .is_transient());
    }
}
