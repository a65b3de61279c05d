//! Index loading.
//!
//! Documents are validated before anything is sent. Valid documents go out
//! through the bulk API in fixed-size chunks keyed by id, so re-sending a
//! document overwrites it. Validation failures and per-item bulk rejections
//! are collected in a [`LoadReport`]; only connectivity failures are retried.

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use etl_search::{index_body, BulkItem, SearchBackend, SearchError};
use etl_types::{ChangedRow, Document, DocumentKind, MovieDocument};

use crate::error::PipelineError;
use crate::retry::RetryPolicy;

/// One document that was not written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub kind: DocumentKind,
    pub id: String,
    pub reason: String,
}

/// Outcome of one or more bulk loads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Documents accepted by the index
    pub loaded: usize,
    /// Documents rejected by validation or by the index
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_failure(&mut self, kind: DocumentKind, id: &str, reason: impl Into<String>) {
        let failure = LoadFailure {
            kind,
            id: id.to_string(),
            reason: reason.into(),
        };
        warn!(
            index = kind.index_name(),
            id = %failure.id,
            reason = %failure.reason,
            "Document not loaded"
        );
        self.failures.push(failure);
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: LoadReport) {
        self.loaded += other.loaded;
        self.failures.extend(other.failures);
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

}

/// A chunk being written, narrowed to the items still owed after each
/// attempt.
struct ChunkWrite {
    remaining: Vec<(String, Value)>,
    loaded: usize,
    rejected: Vec<BulkItem>,
}

impl ChunkWrite {
    fn new(chunk: &[(String, Value)]) -> Mutex<Self> {
        Mutex::new(Self {
            remaining: chunk.to_vec(),
            loaded: 0,
            rejected: Vec::new(),
        })
    }
}

pub struct IndexLoader {
    backend: Arc<dyn SearchBackend>,
    retry: RetryPolicy,
    chunk_size: usize,
}

impl IndexLoader {
    pub fn new(backend: Arc<dyn SearchBackend>, chunk_size: usize, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Create every missing index with its settings and mapping.
    ///
    /// Another process creating the same index first counts as success.
    pub async fn ensure_schemas(&self) -> Result<(), PipelineError> {
        for kind in DocumentKind::ALL {
            let index = kind.index_name();
            let exists = self
                .retry
                .run("index_exists", SearchError::is_transient, || {
                    self.backend.index_exists(index)
                })
                .await?;
            if exists {
                debug!(index, "Index already present");
                continue;
            }

            let body = index_body(kind);
            let created = self
                .retry
                .run("create_index", SearchError::is_transient, || {
                    self.backend.create_index(index, &body)
                })
                .await;
            match created {
                Ok(()) => info!(index, "Index created"),
                Err(SearchError::IndexAlreadyExists(_)) => {
                    debug!(index, "Index created concurrently")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Validate and upsert documents into the index for `kind`.
    pub async fn bulk_upsert(
        &self,
        kind: DocumentKind,
        documents: &[Document],
    ) -> Result<LoadReport, PipelineError> {
        let mut report = LoadReport::new();
        let mut valid: Vec<(String, Value)> = Vec::with_capacity(documents.len());

        for doc in documents {
            if doc.kind() != kind {
                report.record_failure(
                    kind,
                    doc.id(),
                    format!("{} document sent to {} index", doc.kind(), kind.index_name()),
                );
                continue;
            }
            if let Err(e) = doc.validate() {
                report.record_failure(kind, doc.id(), e.to_string());
                continue;
            }
            valid.push((doc.id().to_string(), doc.to_source()?));
        }

        let index = kind.index_name();
        for chunk in valid.chunks(self.chunk_size) {
            let write = ChunkWrite::new(chunk);
            self.retry
                .run("bulk_upsert", SearchError::is_transient, || {
                    self.submit_chunk(index, &write)
                })
                .await?;

            let write = write.into_inner().unwrap_or_else(PoisonError::into_inner);
            report.loaded += write.loaded;
            for item in write.rejected {
                let reason = item
                    .error
                    .unwrap_or_else(|| format!("status {}", item.status));
                report.record_failure(kind, &item.id, reason);
            }
        }

        debug!(
            index,
            loaded = report.loaded,
            failed = report.failures.len(),
            "Bulk upsert finished"
        );
        Ok(report)
    }

    /// Send what is left of a chunk once.
    ///
    /// Items the index refused for back-pressure stay in the chunk and the
    /// attempt fails with a transient error, so the retry policy sends only
    /// those again. Permanent item rejections are set aside for the report.
    async fn submit_chunk(
        &self,
        index: &str,
        write: &Mutex<ChunkWrite>,
    ) -> Result<(), SearchError> {
        let docs = write
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining
            .clone();
        let response = self.backend.bulk_upsert(index, &docs).await?;

        let mut write = write.lock().unwrap_or_else(PoisonError::into_inner);
        write.loaded += response.succeeded();
        let mut throttled = Vec::new();
        for item in response.items.into_iter().filter(|item| !item.is_ok()) {
            if item.is_retryable() {
                throttled.push(item);
            } else {
                write.rejected.push(item);
            }
        }
        write
            .remaining
            .retain(|(id, _)| throttled.iter().any(|item| &item.id == id));

        match throttled.first() {
            None => Ok(()),
            Some(first) => Err(SearchError::Http {
                status: first.status,
                body: format!(
                    "{} of {} bulk items refused, first: {}",
                    throttled.len(),
                    docs.len(),
                    first.error.as_deref().unwrap_or("no reason")
                ),
            }),
        }
    }

    /// Upsert assembled movie documents.
    pub async fn upsert_movies(
        &self,
        movies: Vec<MovieDocument>,
    ) -> Result<LoadReport, PipelineError> {
        let docs: Vec<Document> = movies.into_iter().map(Document::from).collect();
        self.bulk_upsert(DocumentKind::Movie, &docs).await
    }

    /// Turn changed dependent-table rows into documents and upsert them.
    ///
    /// Rows missing a required column are reported and skipped.
    pub async fn upsert_rows(&self, rows: &[ChangedRow]) -> Result<LoadReport, PipelineError> {
        let Some(first) = rows.first() else {
            return Ok(LoadReport::new());
        };
        let kind = first.table.document_kind();

        let mut report = LoadReport::new();
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            match Document::from_dependent_row(row) {
                Ok(doc) => docs.push(doc),
                Err(e) => report.record_failure(row.table.document_kind(), &row.id, e.to_string()),
            }
        }

        report.merge(self.bulk_upsert(kind, &docs).await?);
        Ok(report)
    }
}
