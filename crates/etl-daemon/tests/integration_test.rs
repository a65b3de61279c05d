//! Settings layering and status output against a real state directory.

use std::fs;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use etl_daemon::{load_settings, show_status, Overrides};
use etl_pipeline::{CheckpointStore, PendingIds, RetryPolicy, MOVIE_IDS};
use etl_storage::Storage;

fn write_config(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("etl.toml");
    fs::write(&path, body).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_config_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"
db_path = "/srv/etl/state"

[postgres]
host = "db.internal"
schema = "catalog"

[sync]
batch_size = 250
interval_secs = 30
"#,
    );

    let settings = load_settings(Some(&config), &Overrides::default()).unwrap();
    assert_eq!(settings.db_path, "/srv/etl/state");
    assert_eq!(settings.postgres.host, "db.internal");
    assert_eq!(settings.postgres.schema, "catalog");
    assert_eq!(settings.postgres.port, 5432);
    assert_eq!(settings.sync.batch_size, 250);
    assert_eq!(settings.sync.interval_secs, 30);
    assert_eq!(settings.elastic.url, "http://localhost:9200");
}

#[test]
fn test_cli_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"
db_path = "/srv/etl/state"
log_level = "warn"

[sync]
interval_secs = 30
"#,
    );

    let settings = load_settings(
        Some(&config),
        &Overrides {
            db_path: Some("/tmp/override"),
            log_level: Some("trace"),
            interval_secs: Some(90),
        },
    )
    .unwrap();
    assert_eq!(settings.db_path, "/tmp/override");
    assert_eq!(settings.log_level, "trace");
    assert_eq!(settings.sync.interval_secs, 90);
}

#[test]
fn test_invalid_config_file_rejected() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[sync]\nbatch_size = 0\n");
    assert!(load_settings(Some(&config), &Overrides::default()).is_err());
}

#[test]
fn test_missing_config_file_rejected() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(load_settings(Some(&missing.to_string_lossy()), &Overrides::default()).is_err());
}

#[tokio::test]
async fn test_status_reads_existing_state() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state");

    {
        let storage = Arc::new(Storage::open(&db_path).unwrap());
        let retry = RetryPolicy::default();
        CheckpointStore::new(Arc::clone(&storage), retry.clone())
            .set(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            .await
            .unwrap();
        PendingIds::new(storage, MOVIE_IDS, 100, retry)
            .add("aaaaaaaa-0000-4000-8000-000000000001")
            .await
            .unwrap();
    }

    let report = show_status(None, Some(&db_path.to_string_lossy()))
        .await
        .unwrap();

    assert_eq!(
        report.checkpoint,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    );
    assert_eq!(report.pending_ids, 1);
    assert!(report.disk_usage_bytes > 0);
}

#[tokio::test]
async fn test_status_fails_while_state_is_locked() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state");
    let _held = Storage::open(&db_path).unwrap();

    let result = show_status(None, Some(&db_path.to_string_lossy())).await;
    assert!(result.is_err());
}
