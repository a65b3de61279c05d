//! ETL daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, run-once, status)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    load_settings, read_status, run_once, show_status, start_daemon, Overrides, StatusReport,
};
