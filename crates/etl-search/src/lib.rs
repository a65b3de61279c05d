//! Search index side of the movies sync.
//!
//! Provides:
//! - Index settings and strict mappings for movies, persons and genres
//! - `SearchBackend` trait with check/create/bulk operations
//! - `ElasticClient`: reqwest-based Elasticsearch implementation
//! - `MemoryBackend`: in-process implementation for tests and dry runs

pub mod backend;
pub mod client;
pub mod error;
pub mod memory;
pub mod schema;

pub use backend::{BulkItem, BulkResponse, SearchBackend};
pub use client::{ElasticClient, ElasticClientConfig};
pub use error::{is_retryable_status, SearchError};
pub use memory::MemoryBackend;
pub use schema::{index_body, index_settings, mapping_properties};
