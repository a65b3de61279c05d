//! CLI argument parsing for the ETL daemon.
//!
//! CLI flags override every other config source.

use clap::{Parser, Subcommand};

/// Movies ETL daemon
///
/// Incrementally syncs film works, persons and genres from PostgreSQL
/// into Elasticsearch.
#[derive(Parser, Debug)]
#[command(name = "etl-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/movies-etl/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync continuously until Ctrl+C / SIGTERM
    Start {
        /// Override state database path
        #[arg(long)]
        db_path: Option<String>,

        /// Override seconds between cycles
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Run a single sync cycle and exit
    RunOnce {
        /// Override state database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Show the stored checkpoint and pending ids
    Status {
        /// Override state database path
        #[arg(long)]
        db_path: Option<String>,
    },
}
