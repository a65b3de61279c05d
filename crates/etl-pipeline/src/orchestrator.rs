//! Sync cycle driver.
//!
//! One cycle: read the watermark, scan every table, load changed persons
//! and genres directly, accumulate affected film work ids, drain them page
//! by page (assemble, then load), clear the drained ids and finally advance
//! the watermark. The watermark write is the last step, so an interrupted
//! cycle is simply repeated.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

use etl_search::SearchBackend;
use etl_storage::Storage;
use etl_types::{SyncSettings, Table};

use crate::accumulator::{PendingIds, MOVIE_IDS};
use crate::assemble::DocumentAssembler;
use crate::checkpoint::CheckpointStore;
use crate::error::PipelineError;
use crate::extract::ChangeExtractor;
use crate::loader::{IndexLoader, LoadReport};
use crate::retry::RetryPolicy;
use crate::source::ChangeSource;

/// Where the orchestrator currently is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Extracting,
    Accumulating,
    Draining,
    Assembling,
    Loading,
    Checkpointing,
    Sleeping,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Extracting => "extracting",
            SyncPhase::Accumulating => "accumulating",
            SyncPhase::Draining => "draining",
            SyncPhase::Assembling => "assembling",
            SyncPhase::Loading => "loading",
            SyncPhase::Checkpointing => "checkpointing",
            SyncPhase::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// Tuning for the sync loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Rows per table page, ids per drain page, documents per bulk chunk
    pub batch_size: usize,
    /// Sleep between cycles
    pub interval: Duration,
    /// Pending set holding film work ids
    pub pending_set: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_secs(60),
            pending_set: MOVIE_IDS.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            interval: settings.interval(),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}

/// What a completed cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Watermark the cycle scanned from
    pub since: Option<DateTime<Utc>>,
    /// Changed rows seen per table
    pub changed_rows: BTreeMap<Table, usize>,
    /// Film work ids drained from the pending set
    pub drained_ids: usize,
    /// Drain pages processed
    pub pages: usize,
    /// Persons and genres loaded straight from their rows
    pub dependents: LoadReport,
    /// Assembled movie documents
    pub movies: LoadReport,
    /// Watermark written at the end of the cycle
    pub checkpoint: Option<DateTime<Utc>>,
}

impl CycleStats {
    pub fn failures(&self) -> usize {
        self.dependents.failures.len() + self.movies.failures.len()
    }
}

/// Result of one cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Nothing changed since the watermark; it was left untouched
    NoChanges,
    Completed(CycleStats),
}

/// Drives extract -> accumulate -> assemble -> load -> checkpoint.
pub struct SyncOrchestrator {
    checkpoint: CheckpointStore,
    pending: PendingIds,
    extractor: ChangeExtractor,
    assembler: DocumentAssembler,
    loader: IndexLoader,
    config: SyncConfig,
    phase: SyncPhase,
    cycles: u64,
}

impl SyncOrchestrator {
    pub fn new(
        storage: Arc<Storage>,
        source: Arc<dyn ChangeSource>,
        backend: Arc<dyn SearchBackend>,
        config: SyncConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            checkpoint: CheckpointStore::new(Arc::clone(&storage), retry.clone()),
            pending: PendingIds::new(
                storage,
                config.pending_set.clone(),
                config.batch_size,
                retry.clone(),
            ),
            extractor: ChangeExtractor::new(Arc::clone(&source), config.batch_size, retry.clone()),
            assembler: DocumentAssembler::new(source, retry.clone()),
            loader: IndexLoader::new(backend, config.batch_size, retry),
            config,
            phase: SyncPhase::Idle,
            cycles: 0,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn pending(&self) -> &PendingIds {
        &self.pending
    }

    fn enter(&mut self, phase: SyncPhase) {
        debug!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }

    /// Create any missing index. Run once before the first cycle.
    pub async fn prepare(&self) -> Result<(), PipelineError> {
        self.loader.ensure_schemas().await
    }

    /// Run one full cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        self.cycles += 1;
        let span = info_span!("sync_cycle", cycle = self.cycles);
        let outcome = self.cycle().instrument(span).await;
        self.phase = SyncPhase::Idle;
        outcome
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        self.enter(SyncPhase::Extracting);
        let since = self.checkpoint.get().await?;
        let mut scans = self.extractor.open_scans(since).await?;

        if ChangeExtractor::detect_no_change(&scans) {
            info!(since = %since, "No updates found");
            return Ok(CycleOutcome::NoChanges);
        }

        let mut stats = CycleStats {
            since: Some(since),
            ..Default::default()
        };

        self.enter(SyncPhase::Accumulating);
        for scan in scans.iter_mut() {
            let table = scan.table();
            while let Some(page) = self.extractor.next_page(scan).await? {
                *stats.changed_rows.entry(table).or_default() += page.len();
                if !table.is_root() {
                    stats.dependents.merge(self.loader.upsert_rows(&page).await?);
                }
                let root_ids = self.extractor.resolve_affected_root_ids(table, &page).await?;
                self.pending.add_many(&root_ids).await?;
            }
        }
        info!(changed = ?stats.changed_rows, "Updates found");

        self.enter(SyncPhase::Draining);
        let mut drained: Vec<String> = Vec::new();
        loop {
            let page = self.pending.read_page(drained.last().map(String::as_str)).await?;
            if page.is_empty() {
                break;
            }

            self.enter(SyncPhase::Assembling);
            let movies = self.assembler.assemble_page(&page).await?;

            self.enter(SyncPhase::Loading);
            stats.movies.merge(self.loader.upsert_movies(movies).await?);

            stats.pages += 1;
            drained.extend(page);
            self.enter(SyncPhase::Draining);
        }
        self.pending.clear(&drained).await?;
        stats.drained_ids = drained.len();

        self.enter(SyncPhase::Checkpointing);
        let now = Utc::now();
        self.checkpoint.set(now).await?;
        stats.checkpoint = Some(now);

        if stats.failures() > 0 {
            warn!(failures = stats.failures(), "Cycle finished with rejected documents");
        }
        info!(
            pages = stats.pages,
            movies = stats.movies.loaded,
            dependents = stats.dependents.loaded,
            "Cycle complete"
        );
        Ok(CycleOutcome::Completed(stats))
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// A shutdown during a cycle abandons it before the watermark moves.
    /// Non-transient errors end the loop.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let stopped = tokio::select! {
            biased;
            _ = &mut shutdown => true,
            prepared = self.prepare() => {
                prepared?;
                false
            }
        };
        if stopped {
            info!("Shutdown requested before start");
            return Ok(());
        }

        loop {
            let stopped = tokio::select! {
                biased;
                _ = &mut shutdown => true,
                outcome = self.run_cycle() => {
                    outcome?;
                    false
                }
            };
            if stopped {
                warn!(phase = %self.phase, "Shutdown requested, abandoning cycle");
                self.phase = SyncPhase::Idle;
                return Ok(());
            }

            self.enter(SyncPhase::Sleeping);
            info!(secs = self.config.interval.as_secs(), "Sleeping until next cycle");
            let interval = self.config.interval;
            let stopped = tokio::select! {
                biased;
                _ = &mut shutdown => true,
                _ = tokio::time::sleep(interval) => false,
            };
            self.enter(SyncPhase::Idle);
            if stopped {
                info!("Shutdown requested");
                return Ok(());
            }
        }
    }
}
