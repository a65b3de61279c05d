//! # etl-types
//!
//! Shared domain types for the movies search sync.
//!
//! - Tables: the watched relational tables and how they relate
//! - Rows: changed rows and flattened join rows read from PostgreSQL
//! - Documents: the movie / person / genre documents written to the index
//! - Settings: layered configuration

pub mod config;
pub mod document;
pub mod error;
pub mod row;
pub mod table;

pub use config::{ElasticSettings, PostgresSettings, Settings, SyncSettings};
pub use document::{
    Document, DocumentKind, GenreDocument, MovieDocument, PersonDocument, PersonRef, Role,
};
pub use error::{EtlError, ValidationError};
pub use row::{ChangedRow, JoinRow, RowCursor};
pub use table::Table;
