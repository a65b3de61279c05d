//! Configuration loading for the sync daemon.
//!
//! Layered config: defaults -> user config file -> CLI config file -> env vars.
//! CLI flags are applied by the caller on top of the loaded settings.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::EtlError;

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSettings {
    #[serde(default = "default_pg_host")]
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    #[serde(default = "default_pg_dbname")]
    pub dbname: String,

    #[serde(default = "default_pg_user")]
    pub user: String,

    /// Password (prefer ETL__POSTGRES__PASSWORD over the config file)
    #[serde(default = "default_pg_password")]
    pub password: String,

    /// Schema holding the film_work / person / genre tables
    #[serde(default = "default_pg_schema")]
    pub schema: String,
}

fn default_pg_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_dbname() -> String {
    "cinemax_database".to_string()
}

fn default_pg_user() -> String {
    "postgres".to_string()
}

fn default_pg_password() -> String {
    "postgres".to_string()
}

fn default_pg_schema() -> String {
    "content".to_string()
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            dbname: default_pg_dbname(),
            user: default_pg_user(),
            password: default_pg_password(),
            schema: default_pg_schema(),
        }
    }
}

/// Elasticsearch connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticSettings {
    /// Base URL, e.g. http://localhost:9200
    #[serde(default = "default_elastic_url")]
    pub url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_elastic_timeout")]
    pub timeout_secs: u64,
}

fn default_elastic_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_elastic_timeout() -> u64 {
    30
}

impl Default for ElasticSettings {
    fn default() -> Self {
        Self {
            url: default_elastic_url(),
            timeout_secs: default_elastic_timeout(),
        }
    }
}

/// Cycle and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Rows per table page, ids per drain page, documents per bulk chunk
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep between cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// First retry delay
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Delay multiplier after each failure
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Retry delay ceiling
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_interval_secs() -> u64 {
    60
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: default_interval_secs(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_factor: default_backoff_factor(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl SyncSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.interval_secs == 0 {
            return Err("interval_secs must be > 0".to_string());
        }
        if self.backoff_initial_ms == 0 {
            return Err("backoff_initial_ms must be > 0".to_string());
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            ));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err("backoff_max_ms must be >= backoff_initial_ms".to_string());
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB state directory (checkpoint + pending ids)
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub postgres: PostgresSettings,

    #[serde(default)]
    pub elastic: ElasticSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "movies-etl")
        .map(|p| p.data_local_dir().join("state"))
        .unwrap_or_else(|| PathBuf::from("./state"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            postgres: PostgresSettings::default(),
            elastic: ElasticSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/movies-etl/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (ETL__*, `__` between sections)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, EtlError> {
        let config_dir = ProjectDirs::from("", "", "movies-etl")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| EtlError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| EtlError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: ETL__DB_PATH, ETL__POSTGRES__HOST, ETL__SYNC__BATCH_SIZE, etc.
        builder = builder.add_source(
            Environment::with_prefix("ETL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| EtlError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| EtlError::Config(e.to_string()))?;

        settings.sync.validate().map_err(EtlError::Config)?;
        Ok(settings)
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
