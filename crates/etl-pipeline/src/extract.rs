//! Change extraction.
//!
//! Each cycle opens one keyset-paginated scan per watched table, all using
//! the same watermark. The first page of every scan is fetched up front so
//! "nothing changed" can be decided before any work is done.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use etl_types::{ChangedRow, RowCursor, Table};

use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::source::{ChangeSource, SourceError};

/// Paginated scan of one table for one watermark.
#[derive(Debug)]
pub struct TableScan {
    table: Table,
    since: DateTime<Utc>,
    first_page_len: usize,
    /// First page, fetched eagerly and not yet handed out
    buffered: Option<Vec<ChangedRow>>,
    cursor: Option<RowCursor>,
    exhausted: bool,
}

impl TableScan {
    pub fn table(&self) -> Table {
        self.table
    }

    /// Whether the first page came back empty.
    pub fn is_empty(&self) -> bool {
        self.first_page_len == 0
    }
}

pub struct ChangeExtractor {
    source: Arc<dyn ChangeSource>,
    retry: RetryPolicy,
    page_size: usize,
}

impl ChangeExtractor {
    pub fn new(source: Arc<dyn ChangeSource>, page_size: usize, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            page_size: page_size.max(1),
        }
    }

    /// One page of `table` rows modified after `since`, after `cursor`.
    pub async fn scan_table(
        &self,
        table: Table,
        since: DateTime<Utc>,
        cursor: Option<&RowCursor>,
    ) -> Result<Vec<ChangedRow>, PipelineError> {
        let rows = self
            .retry
            .run("scan_table", SourceError::is_transient, || {
                self.source.scan_table(table, since, cursor, self.page_size)
            })
            .await?;
        Ok(rows)
    }

    /// Open a scan of every watched table with the same watermark.
    pub async fn open_scans(&self, since: DateTime<Utc>) -> Result<Vec<TableScan>, PipelineError> {
        let mut scans = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let first = self.scan_table(table, since, None).await?;
            debug!(table = %table, rows = first.len(), "Opened table scan");
            scans.push(TableScan {
                table,
                since,
                first_page_len: first.len(),
                exhausted: first.len() < self.page_size,
                cursor: first.last().map(ChangedRow::cursor),
                buffered: Some(first),
            });
        }
        Ok(scans)
    }

    /// True when no table has a row modified after the watermark.
    pub fn detect_no_change(scans: &[TableScan]) -> bool {
        scans.iter().all(TableScan::is_empty)
    }

    /// Next non-empty page of a scan, `None` once the table is exhausted.
    pub async fn next_page(
        &self,
        scan: &mut TableScan,
    ) -> Result<Option<Vec<ChangedRow>>, PipelineError> {
        if let Some(first) = scan.buffered.take() {
            if !first.is_empty() {
                return Ok(Some(first));
            }
        }
        if scan.exhausted {
            return Ok(None);
        }

        let page = self
            .scan_table(scan.table, scan.since, scan.cursor.as_ref())
            .await?;
        if page.len() < self.page_size {
            scan.exhausted = true;
        }
        if page.is_empty() {
            return Ok(None);
        }
        scan.cursor = page.last().map(ChangedRow::cursor);
        Ok(Some(page))
    }

    /// Root ids that must be rebuilt because of these rows.
    ///
    /// Root rows map to themselves; dependent rows go through their
    /// association table.
    pub async fn resolve_affected_root_ids(
        &self,
        table: Table,
        rows: &[ChangedRow],
    ) -> Result<Vec<String>, PipelineError> {
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        if table.is_root() || ids.is_empty() {
            return Ok(ids);
        }

        let root_ids = self
            .retry
            .run("resolve_root_ids", SourceError::is_transient, || {
                self.source.resolve_root_ids(table, &ids)
            })
            .await?;
        info!(
            table = %table,
            changed = ids.len(),
            affected = root_ids.len(),
            "Resolved affected film works"
        );
        Ok(root_ids)
    }
}
