//! Movies ETL daemon
//!
//! Keeps the `movies`, `persons` and `genres` search indices in step with
//! the relational `content` schema.
//!
//! # Usage
//!
//! ```bash
//! etl-daemon start [--db-path PATH] [--interval SECS]
//! etl-daemon run-once [--db-path PATH]
//! etl-daemon status [--db-path PATH]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/movies-etl/config.toml)
//! 3. `--config` file
//! 4. Environment variables (ETL__*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use etl_daemon::{run_once, show_status, start_daemon, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { db_path, interval } => {
            start_daemon(
                cli.config.as_deref(),
                db_path.as_deref(),
                interval,
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::RunOnce { db_path } => {
            run_once(
                cli.config.as_deref(),
                db_path.as_deref(),
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Status { db_path } => {
            show_status(cli.config.as_deref(), db_path.as_deref()).await?;
        }
    }

    Ok(())
}
