//! In-process search backend for tests.
//!
//! Keeps every index as an ordered map of id -> source. Honors strict
//! top-level mappings the way the cluster does, and can be told to fail
//! upcoming calls or reject specific ids so callers' retry and reporting
//! paths can be exercised without a cluster.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

use crate::backend::{BulkItem, BulkResponse, SearchBackend};
use crate::error::SearchError;

#[derive(Debug, Default)]
struct IndexState {
    body: Value,
    docs: BTreeMap<String, Value>,
}

impl IndexState {
    /// Top-level field names a strict mapping accepts, `None` if unrestricted.
    fn allowed_fields(&self) -> Option<HashSet<&str>> {
        let mappings = self.body.get("mappings")?;
        if mappings.get("dynamic").and_then(Value::as_str) != Some("strict") {
            return None;
        }
        let properties = mappings.get("properties")?.as_object()?;
        Some(properties.keys().map(String::as_str).collect())
    }
}

#[derive(Debug, Default)]
struct State {
    indices: HashMap<String, IndexState>,
    /// Upcoming calls that fail with 503 before doing anything
    unavailable_calls: usize,
    rejected_ids: HashSet<String>,
    /// Ids answered with a per-item 429 for this many more bulk writes
    throttled_ids: HashMap<String, usize>,
    bulk_requests: usize,
    create_requests: usize,
}

impl State {
    fn take_unavailable(&mut self) -> Result<(), SearchError> {
        if self.unavailable_calls > 0 {
            self.unavailable_calls -= 1;
            return Err(SearchError::Http {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// `SearchBackend` held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls (of any kind) fail with HTTP 503.
    pub async fn fail_next(&self, n: usize) {
        self.state.lock().await.unavailable_calls = n;
    }

    /// Reject bulk writes of this id with a per-item 400.
    pub async fn reject_id(&self, id: impl Into<String>) {
        self.state.lock().await.rejected_ids.insert(id.into());
    }

    /// Answer bulk writes of this id with a per-item 429 `times` times.
    pub async fn throttle_id(&self, id: impl Into<String>, times: usize) {
        self.state.lock().await.throttled_ids.insert(id.into(), times);
    }

    /// Stored source for one document.
    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state.indices.get(index)?.docs.get(id).cloned()
    }

    /// All stored ids of an index, ascending.
    pub async fn ids(&self, index: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .indices
            .get(index)
            .map(|i| i.docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Body the index was created with.
    pub async fn index_definition(&self, index: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state.indices.get(index).map(|i| i.body.clone())
    }

    /// Number of bulk requests received (including failed ones).
    pub async fn bulk_requests(&self) -> usize {
        self.state.lock().await.bulk_requests
    }

    /// Number of create-index requests received.
    pub async fn create_requests(&self) -> usize {
        self.state.lock().await.create_requests
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchError> {
        let mut state = self.state.lock().await;
        state.take_unavailable()?;
        Ok(state.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchError> {
        let mut state = self.state.lock().await;
        state.create_requests += 1;
        state.take_unavailable()?;
        if state.indices.contains_key(index) {
            return Err(SearchError::IndexAlreadyExists(index.to_string()));
        }
        state.indices.insert(
            index.to_string(),
            IndexState {
                body: body.clone(),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        docs: &[(String, Value)],
    ) -> Result<BulkResponse, SearchError> {
        let mut state = self.state.lock().await;
        state.bulk_requests += 1;
        state.take_unavailable()?;

        let State {
            indices,
            rejected_ids,
            throttled_ids,
            ..
        } = &mut *state;
        // Writes to a missing index auto-create it without a mapping
        let target = indices.entry(index.to_string()).or_default();

        let mut items = Vec::with_capacity(docs.len());
        for (id, source) in docs {
            if rejected_ids.contains(id) {
                items.push(BulkItem::rejected(id, 400, "mapper_parsing_exception"));
                continue;
            }
            if let Some(left) = throttled_ids.get_mut(id).filter(|left| **left > 0) {
                *left -= 1;
                items.push(BulkItem::rejected(id, 429, "es_rejected_execution_exception"));
                continue;
            }
            let unknown = match (target.allowed_fields(), source.as_object()) {
                (Some(allowed), Some(fields)) => fields
                    .keys()
                    .find(|k| !allowed.contains(k.as_str()))
                    .cloned(),
                _ => None,
            };
            if let Some(field) = unknown {
                items.push(BulkItem::rejected(
                    id,
                    400,
                    format!("strict_dynamic_mapping_exception: [{}] not allowed", field),
                ));
                continue;
            }
            target.docs.insert(id.clone(), source.clone());
            items.push(BulkItem::ok(id));
        }

        Ok(BulkResponse { items })
    }

    async fn count(&self, index: &str) -> Result<u64, SearchError> {
        let mut state = self.state.lock().await;
        state.take_unavailable()?;
        Ok(state
            .indices
            .get(index)
            .map(|i| i.docs.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::index_body;
    use etl_types::DocumentKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_then_exists() {
        let backend = MemoryBackend::new();
        assert!(!backend.index_exists("genres").await.unwrap());
        backend
            .create_index("genres", &index_body(DocumentKind::Genre))
            .await
            .unwrap();
        assert!(backend.index_exists("genres").await.unwrap());

        let err = backend.create_index("genres", &json!({})).await.unwrap_err();
        assert!(matches!(err, SearchError::IndexAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_throttled_id_recovers() {
        let backend = MemoryBackend::new();
        backend.throttle_id("g", 1).await;
        let docs = vec![("g".to_string(), json!({ "id": "g", "name": "Drama" }))];

        let first = backend.bulk_upsert("genres", &docs).await.unwrap();
        assert!(first.items[0].is_retryable());

        let second = backend.bulk_upsert("genres", &docs).await.unwrap();
        assert!(second.items[0].is_ok());
        assert_eq!(backend.count("genres").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let backend = MemoryBackend::new();
        let first = vec![("g".to_string(), json!({ "id": "g", "name": "Drama" }))];
        let second = vec![("g".to_string(), json!({ "id": "g", "name": "Comedy" }))];

        backend.bulk_upsert("genres", &first).await.unwrap();
        backend.bulk_upsert("genres", &second).await.unwrap();

        assert_eq!(backend.count("genres").await.unwrap(), 1);
        assert_eq!(
            backend.document("genres", "g").await.unwrap()["name"],
            "Comedy"
        );
    }

    #[tokio::test]
    async fn test_strict_mapping_rejects_unknown_field() {
        let backend = MemoryBackend::new();
        backend
            .create_index("persons", &index_body(DocumentKind::Person))
            .await
            .unwrap();

        let docs = vec![
            ("p1".to_string(), json!({ "id": "p1", "full_name": "A" })),
            ("p2".to_string(), json!({ "id": "p2", "full_name": "B", "age": 3 })),
        ];
        let response = backend.bulk_upsert("persons", &docs).await.unwrap();

        assert_eq!(response.succeeded(), 1);
        assert_eq!(backend.ids("persons").await, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let backend = MemoryBackend::new();
        backend.fail_next(2).await;

        assert!(backend.count("movies").await.unwrap_err().is_transient());
        assert!(backend.index_exists("movies").await.is_err());
        assert_eq!(backend.count("movies").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_id() {
        let backend = MemoryBackend::new();
        backend.reject_id("bad").await;
        let docs = vec![
            ("bad".to_string(), json!({ "id": "bad" })),
            ("good".to_string(), json!({ "id": "good" })),
        ];
        let response = backend.bulk_upsert("movies", &docs).await.unwrap();
        assert_eq!(response.failures().count(), 1);
        assert_eq!(backend.bulk_requests().await, 1);
    }
}
