//! Pinecone REST client (control plane + data plane).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use billtrack_core::VectorRecord;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    IndexDescription, IndexSpec, IndexStats, QueryMatch, QueryRequest, StoreError, VectorStore,
};

pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";
pub const API_VERSION: &str = "2024-07";

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub control_url: String,
    pub timeout: Duration,
}

impl PineconeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            control_url: DEFAULT_CONTROL_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Client constructed once per process and shared by reference.
#[derive(Debug)]
pub struct PineconeClient {
    http: reqwest::Client,
    control_url: String,
    hosts: Mutex<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

impl PineconeClient {
    pub fn new(config: PineconeConfig) -> Result<Self, StoreError> {
        if config.api_key.trim().is_empty() {
            return Err(StoreError::Config("missing Pinecone API key".to_string()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(config.api_key.trim())
                .map_err(|_| StoreError::Config("invalid Pinecone API key".to_string()))?,
        );
        headers.insert(
            "X-Pinecone-API-Version",
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            http,
            control_url: config.control_url.trim_end_matches('/').to_string(),
            hosts: Mutex::new(HashMap::new()),
        })
    }

    async fn remember_hosts(&self, indexes: &[IndexDescription]) {
        let mut hosts = self.hosts.lock().await;
        for index in indexes.iter().filter(|i| !i.host.is_empty()) {
            hosts.insert(index.name.clone(), data_plane_url(&index.host));
        }
    }

    async fn index_url(&self, index: &str) -> Result<String, StoreError> {
        if let Some(url) = self.hosts.lock().await.get(index) {
            return Ok(url.clone());
        }
        let resp = self
            .http
            .get(format!("{}/indexes/{}", self.control_url, index))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::IndexNotFound(index.to_string()));
        }
        let description: IndexDescription = decode("describe_index", resp).await?;
        if description.host.is_empty() {
            return Err(StoreError::Config(format!("index {index} has no host yet")));
        }
        let url = data_plane_url(&description.host);
        self.hosts
            .lock()
            .await
            .insert(index.to_string(), url.clone());
        Ok(url)
    }
}

fn data_plane_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    resp: Response,
) -> Result<T, StoreError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(StoreError::Status {
            operation,
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

#[async_trait]
impl VectorStore for PineconeClient {
    async fn list_indexes(&self) -> Result<Vec<IndexDescription>, StoreError> {
        let resp = self
            .http
            .get(format!("{}/indexes", self.control_url))
            .send()
            .await?;
        let list: IndexList = decode("list_indexes", resp).await?;
        self.remember_hosts(&list.indexes).await;
        Ok(list.indexes)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        let body = json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "metric": spec.metric,
            "spec": { "serverless": { "cloud": spec.cloud, "region": spec.region } },
        });
        let resp = self
            .http
            .post(format!("{}/indexes", self.control_url))
            .json(&body)
            .send()
            .await?;
        if resp.status() == StatusCode::CONFLICT {
            debug!(index = %spec.name, "index already exists");
            return Ok(());
        }
        let created: IndexDescription = decode("create_index", resp).await?;
        self.remember_hosts(std::slice::from_ref(&created)).await;
        Ok(())
    }

    async fn describe_index_stats(&self, index: &str) -> Result<IndexStats, StoreError> {
        let url = self.index_url(index).await?;
        let resp = self
            .http
            .post(format!("{url}/describe_index_stats"))
            .json(&json!({}))
            .send()
            .await?;
        decode("describe_index_stats", resp).await
    }

    async fn upsert(&self, index: &str, vectors: &[VectorRecord]) -> Result<usize, StoreError> {
        let url = self.index_url(index).await?;
        let resp = self
            .http
            .post(format!("{url}/vectors/upsert"))
            .json(&json!({ "vectors": vectors }))
            .send()
            .await?;
        let upserted: UpsertResponse = decode("upsert", resp).await?;
        Ok(upserted.upserted_count)
    }

    async fn query(
        &self,
        index: &str,
        request: &QueryRequest,
    ) -> Result<Vec<QueryMatch>, StoreError> {
        let url = self.index_url(index).await?;
        let resp = self
            .http
            .post(format!("{url}/query"))
            .json(request)
            .send()
            .await?;
        let parsed: QueryResponse = decode("query", resp).await?;
        Ok(parsed.matches)
    }
}
