//! Elasticsearch HTTP client.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::{BulkItem, BulkResponse, SearchBackend};
use crate::error::SearchError;

/// Configuration for the Elasticsearch client.
#[derive(Debug, Clone)]
pub struct ElasticClientConfig {
    /// Cluster base URL (e.g., "http://localhost:9200")
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ElasticClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&etl_types::ElasticSettings> for ElasticClientConfig {
    fn from(settings: &etl_types::ElasticSettings) -> Self {
        Self::new(settings.url.clone()).with_timeout(Duration::from_secs(settings.timeout_secs))
    }
}

/// reqwest-backed `SearchBackend`.
pub struct ElasticClient {
    client: Client,
    base_url: String,
}

impl ElasticClient {
    pub fn new(config: ElasticClientConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// Turn a non-success response into `SearchError::Http`.
async fn check_status(response: Response) -> Result<Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Render bulk `index` actions as newline-delimited JSON.
fn bulk_body(index: &str, docs: &[(String, Value)]) -> Result<String, SearchError> {
    let mut body = String::new();
    for (id, source) in docs {
        let action = serde_json::json!({ "index": { "_index": index, "_id": id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(source)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, RawBulkItem>>,
}

#[derive(Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default)]
    status: u16,
    error: Option<Value>,
}

/// Short reason from a bulk item error object.
fn error_reason(error: &Value) -> String {
    let kind = error.get("type").and_then(Value::as_str);
    let reason = error.get("reason").and_then(Value::as_str);
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
        (Some(kind), None) => kind.to_string(),
        _ => error.to_string(),
    }
}

fn parse_bulk_response(raw: RawBulkResponse) -> BulkResponse {
    let items = raw
        .items
        .into_iter()
        .filter_map(|mut entry| {
            // One action per entry; we only ever send `index`
            let key = entry.keys().next().cloned()?;
            entry.remove(&key)
        })
        .map(|item| match item.error {
            Some(error) => BulkItem::rejected(item.id, item.status, error_reason(&error)),
            None => BulkItem {
                id: item.id,
                status: item.status,
                error: None,
            },
        })
        .collect();
    BulkResponse { items }
}

#[async_trait]
impl SearchBackend for ElasticClient {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchError> {
        let response = self.client.head(self.url(index)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => check_status(response).await.map(|_| true),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchError> {
        let response = self.client.put(self.url(index)).json(body).send().await?;

        match check_status(response).await {
            Ok(_) => {
                info!(index = %index, "Created index");
                Ok(())
            }
            Err(SearchError::Http { status: 400, body })
                if body.contains("resource_already_exists_exception") =>
            {
                Err(SearchError::IndexAlreadyExists(index.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        docs: &[(String, Value)],
    ) -> Result<BulkResponse, SearchError> {
        if docs.is_empty() {
            return Ok(BulkResponse::default());
        }

        let body = bulk_body(index, docs)?;
        debug!(index = %index, docs = docs.len(), "Sending bulk request");

        let response = self
            .client
            .post(self.url("_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let raw: RawBulkResponse = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;
        Ok(parse_bulk_response(raw))
    }

    async fn count(&self, index: &str) -> Result<u64, SearchError> {
        #[derive(Deserialize)]
        struct CountResponse {
            count: u64,
        }

        let response = self
            .client
            .get(self.url(&format!("{}/_count", index)))
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: CountResponse = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;
        Ok(body.count)
    }
}
