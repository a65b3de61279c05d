//! Command implementations for the ETL daemon.
//!
//! Handles:
//! - start: Load config, open state, sync until a shutdown signal
//! - run-once: One sync cycle, then exit
//! - status: Print the stored checkpoint and pending id count

use std::fmt;
use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::signal;
use tracing::{error, info};

use etl_pipeline::{
    ChangeSource, CheckpointStore, CycleOutcome, PendingIds, PostgresSource,
    PostgresSourceConfig, RetryPolicy, SyncConfig, SyncOrchestrator, MOVIE_IDS,
};
use etl_search::{ElasticClient, ElasticClientConfig, SearchBackend};
use etl_storage::Storage;
use etl_types::Settings;

/// CLI values that take precedence over every config source.
#[derive(Debug, Clone, Default)]
pub struct Overrides<'a> {
    pub db_path: Option<&'a str>,
    pub log_level: Option<&'a str>,
    pub interval_secs: Option<u64>,
}

/// Load layered settings and apply CLI overrides on top.
pub fn load_settings(config_path: Option<&str>, overrides: &Overrides<'_>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(db_path) = overrides.db_path {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = overrides.log_level {
        settings.log_level = log_level.to_string();
    }
    if let Some(secs) = overrides.interval_secs {
        settings.sync.interval_secs = secs;
    }

    settings
        .sync
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid sync settings: {}", e))?;
    Ok(settings)
}

fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    info!("Opening state store at {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }

    let storage = Storage::open(&db_path).context("Failed to open state store")?;
    Ok(Arc::new(storage))
}

fn build_orchestrator(settings: &Settings) -> Result<SyncOrchestrator> {
    let storage = open_storage(settings)?;

    let source: Arc<dyn ChangeSource> = Arc::new(PostgresSource::new(
        PostgresSourceConfig::from(&settings.postgres),
    ));
    let backend: Arc<dyn SearchBackend> = Arc::new(
        ElasticClient::new(ElasticClientConfig::from(&settings.elastic))
            .context("Failed to build Elasticsearch client")?,
    );

    Ok(SyncOrchestrator::new(
        storage,
        source,
        backend,
        SyncConfig::from_settings(&settings.sync),
        RetryPolicy::from_settings(&settings.sync),
    ))
}

fn log_configuration(settings: &Settings) {
    info!("Configuration:");
    info!("  State path: {}", settings.db_path);
    info!(
        "  PostgreSQL: {}:{}/{} (schema {})",
        settings.postgres.host,
        settings.postgres.port,
        settings.postgres.dbname,
        settings.postgres.schema
    );
    info!("  Elasticsearch: {}", settings.elastic.url);
    info!("  Batch size: {}", settings.sync.batch_size);
    info!("  Interval: {}s", settings.sync.interval_secs);
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the sync loop.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open the RocksDB state store
/// 3. Connect the change source and search backend
/// 4. Cycle until SIGINT/SIGTERM
pub async fn start_daemon(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    interval_override: Option<u64>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let settings = load_settings(
        config_path,
        &Overrides {
            db_path: db_path_override,
            log_level: log_level_override,
            interval_secs: interval_override,
        },
    )?;
    init_tracing(&settings.log_level)?;

    info!("ETL daemon starting...");
    log_configuration(&settings);

    let mut orchestrator = build_orchestrator(&settings)?;
    orchestrator
        .run(shutdown_signal())
        .await
        .context("Sync loop failed")?;

    info!("ETL daemon stopped");
    Ok(())
}

/// Run exactly one cycle.
pub async fn run_once(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let settings = load_settings(
        config_path,
        &Overrides {
            db_path: db_path_override,
            log_level: log_level_override,
            interval_secs: None,
        },
    )?;
    init_tracing(&settings.log_level)?;
    log_configuration(&settings);

    let mut orchestrator = build_orchestrator(&settings)?;
    orchestrator
        .prepare()
        .await
        .context("Failed to prepare indices")?;

    match orchestrator.run_cycle().await.context("Sync cycle failed")? {
        CycleOutcome::NoChanges => println!("No updates found"),
        CycleOutcome::Completed(stats) => {
            println!("Cycle complete");
            for (table, rows) in &stats.changed_rows {
                println!("  {:<10} {} changed rows", table.to_string(), rows);
            }
            println!("  Movies loaded:     {}", stats.movies.loaded);
            println!("  Dependents loaded: {}", stats.dependents.loaded);
            println!("  Rejected:          {}", stats.failures());
            if let Some(checkpoint) = stats.checkpoint {
                println!("  Checkpoint:        {}", checkpoint.to_rfc3339());
            }
        }
    }
    Ok(())
}

/// Stored sync state as shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state_path: String,
    pub checkpoint: DateTime<Utc>,
    pub pending_ids: u64,
    pub disk_usage_bytes: u64,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "State path:   {}", self.state_path)?;
        writeln!(f, "Checkpoint:   {}", self.checkpoint.to_rfc3339())?;
        writeln!(f, "Pending ids:  {}", self.pending_ids)?;
        write!(f, "Disk usage:   {} bytes", self.disk_usage_bytes)
    }
}

/// Read the stored checkpoint and pending id count.
///
/// Opens the state store directly, so it fails while a daemon holds the lock.
pub async fn read_status(settings: &Settings) -> Result<StatusReport> {
    let storage = Storage::open(&settings.expanded_db_path())
        .context("Failed to open state store (is the daemon running?)")?;
    let storage = Arc::new(storage);
    let retry = RetryPolicy::default().with_max_attempts(1);

    let checkpoint = CheckpointStore::new(Arc::clone(&storage), retry.clone())
        .get()
        .await
        .context("Failed to read checkpoint")?;
    let pending_ids = PendingIds::new(Arc::clone(&storage), MOVIE_IDS, settings.sync.batch_size, retry)
        .len()
        .await
        .context("Failed to count pending ids")?;
    let stats = storage.get_stats().context("Failed to read storage stats")?;

    Ok(StatusReport {
        state_path: settings.db_path.clone(),
        checkpoint,
        pending_ids,
        disk_usage_bytes: stats.disk_usage_bytes,
    })
}

/// Print the stored checkpoint and pending id count.
pub async fn show_status(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
) -> Result<StatusReport> {
    let settings = load_settings(
        config_path,
        &Overrides {
            db_path: db_path_override,
            ..Default::default()
        },
    )?;

    let report = read_status(&settings).await?;
    println!("{}", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_take_precedence() {
        let settings = load_settings(
            None,
            &Overrides {
                db_path: Some("/custom/state"),
                log_level: Some("debug"),
                interval_secs: Some(5),
            },
        )
        .unwrap();
        assert_eq!(settings.db_path, "/custom/state");
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.sync.interval_secs, 5);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = load_settings(
            None,
            &Overrides {
                interval_secs: Some(0),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_status_on_fresh_state() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state");
        let report = show_status(None, Some(&path.to_string_lossy()))
            .await
            .unwrap();

        assert_eq!(report.checkpoint, etl_pipeline::min_timestamp());
        assert_eq!(report.pending_ids, 0);
        assert_eq!(report.state_path, path.to_string_lossy());
    }

    #[test]
    fn test_status_report_display() {
        let report = StatusReport {
            state_path: "/var/lib/etl".to_string(),
            checkpoint: etl_pipeline::min_timestamp(),
            pending_ids: 3,
            disk_usage_bytes: 2048,
        };
        let text = report.to_string();
        assert!(text.contains("Checkpoint:   0001-01-01T00:00:00+00:00"));
        assert!(text.contains("Pending ids:  3"));
    }
}
