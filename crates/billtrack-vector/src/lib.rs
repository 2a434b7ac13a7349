//! Vector index access, embeddings and the upload synchronizer for bill records.

mod embed;
mod memory;
mod pinecone;
mod probe;
mod upload;

use std::collections::BTreeMap;

use async_trait::async_trait;
use billtrack_core::{VectorMetadata, VectorRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use embed::{EmbedError, Embedder, HashEmbedder, OpenAiConfig, OpenAiEmbedder};
pub use memory::MemoryVectorStore;
pub use pinecone::{PineconeClient, PineconeConfig};
pub use probe::{probe_destination, DestinationProbe};
pub use upload::{
    embedding_text, fallback_vector_id, query_similar, to_vector_record, vector_id, SearchError,
    SimilarBill, UploadConfig, UploadError, UploadReport, UploadSynchronizer, DEFAULT_BATCH_SIZE,
};

pub const CRATE_NAME: &str = "billtrack-vector";

pub const DEFAULT_INDEX_NAME: &str = "bill-tracker";
pub const DEFAULT_DIMENSION: u32 = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dotproduct,
}

/// Parameters used when the destination index has to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: u32,
    pub metric: Metric,
    pub cloud: String,
    pub region: String,
}

impl IndexSpec {
    pub fn serverless(name: impl Into<String>, dimension: u32) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric: Metric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescription {
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub dimension: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NamespaceStats {
    #[serde(rename = "vectorCount", alias = "recordCount", default)]
    pub record_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexStats {
    #[serde(rename = "totalVectorCount", alias = "totalRecordCount", default)]
    pub total_record_count: Option<u64>,
    #[serde(default)]
    pub dimension: Option<u32>,
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub include_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<VectorMetadata>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned http {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("index {0} does not exist")]
    IndexNotFound(String),
    #[error("vector {id} has dimension {actual}, index expects {expected}")]
    Dimension {
        id: String,
        expected: u32,
        actual: usize,
    },
    #[error("vector store configuration: {0}")]
    Config(String),
}

/// Operations consumed from the destination vector index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn list_indexes(&self) -> Result<Vec<IndexDescription>, StoreError>;

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError>;

    async fn describe_index_stats(&self, index: &str) -> Result<IndexStats, StoreError>;

    /// Inserts or replaces vectors by id; returns the number upserted.
    async fn upsert(&self, index: &str, vectors: &[VectorRecord]) -> Result<usize, StoreError>;

    async fn query(&self, index: &str, request: &QueryRequest)
        -> Result<Vec<QueryMatch>, StoreError>;
}
