//! Pushes sink records into the destination index.

use std::sync::Arc;
use std::time::Duration;

use billtrack_core::{BillRecord, VectorMetadata, VectorRecord};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::{EmbedError, Embedder, IndexSpec, QueryRequest, StoreError, VectorStore};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to prepare index {index}: {source}")]
    Index {
        index: String,
        #[source]
        source: StoreError,
    },
    #[error("index {index} has dimension {actual}, embedder produces {expected}")]
    DimensionMismatch {
        index: String,
        expected: u32,
        actual: u32,
    },
    #[error("embedding batch {batch} failed: {source}")]
    Embed {
        batch: usize,
        #[source]
        source: EmbedError,
    },
    #[error("upsert of batch {batch} ({records} records) failed: {source}")]
    Batch {
        batch: usize,
        records: usize,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub index: IndexSpec,
    pub batch_size: usize,
    /// Wait applied after creating an index before the first upsert.
    pub settle_delay: Duration,
}

impl UploadConfig {
    pub fn new(index: IndexSpec) -> Self {
        Self {
            index,
            batch_size: DEFAULT_BATCH_SIZE,
            settle_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub index_created: bool,
    pub batches: usize,
    pub records_upserted: usize,
}

/// Vector id for a record: the title lowercased with every whitespace run, leading and
/// trailing ones included, replaced by `-`.
///
/// Returns `None` for an empty title; callers fall back to [`fallback_vector_id`], which is not
/// stable across runs.
pub fn vector_id(title: &str) -> Option<String> {
    if title.is_empty() {
        return None;
    }
    let mut id = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.chars() {
        if c.is_whitespace() {
            if !in_space {
                id.push('-');
            }
            in_space = true;
        } else {
            id.extend(c.to_lowercase());
            in_space = false;
        }
    }
    Some(id)
}

pub fn fallback_vector_id() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(7).collect();
    format!("bill-{}-{}", Utc::now().timestamp_millis(), suffix)
}

pub fn embedding_text(record: &BillRecord) -> String {
    format!(
        "{} {} {}",
        record.title,
        record.description,
        record.extended_content()
    )
}

pub fn to_vector_record(record: &BillRecord, values: Vec<f32>) -> VectorRecord {
    let id = vector_id(&record.title).unwrap_or_else(|| {
        let id = fallback_vector_id();
        warn!(id = %id, "record has no title; using a non-deterministic vector id");
        id
    });
    VectorRecord {
        id,
        values,
        metadata: VectorMetadata {
            title: record.title.clone(),
            description: record.description.clone(),
            source_url: record.source_url.clone(),
            issued_date: record.issued_date.clone(),
            content: record.extended_content(),
        },
    }
}

pub struct UploadSynchronizer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: UploadConfig,
}

impl UploadSynchronizer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Creates the index when missing. Returns whether it was created.
    pub async fn ensure_index(&self) -> Result<bool, UploadError> {
        let spec = &self.config.index;
        let index_err = |source| UploadError::Index {
            index: spec.name.clone(),
            source,
        };

        let existing = self.store.list_indexes().await.map_err(index_err)?;
        if let Some(found) = existing.iter().find(|i| i.name == spec.name) {
            if let Some(actual) = found.dimension {
                let expected = self.embedder.dimension() as u32;
                if actual != expected {
                    return Err(UploadError::DimensionMismatch {
                        index: spec.name.clone(),
                        expected,
                        actual,
                    });
                }
            }
            return Ok(false);
        }

        info!(
            index = %spec.name,
            dimension = spec.dimension,
            cloud = %spec.cloud,
            region = %spec.region,
            "creating destination index"
        );
        self.store.create_index(spec).await.map_err(index_err)?;
        if !self.config.settle_delay.is_zero() {
            info!(secs = self.config.settle_delay.as_secs(), "waiting for index to settle");
            tokio::time::sleep(self.config.settle_delay).await;
        }
        Ok(true)
    }

    /// Embeds and upserts every record in fixed-size batches. The first failing batch aborts
    /// the upload.
    pub async fn upload(&self, records: &[BillRecord]) -> Result<UploadReport, UploadError> {
        let mut report = UploadReport {
            index_created: self.ensure_index().await?,
            ..UploadReport::default()
        };
        let batch_size = self.config.batch_size.max(1);
        let total_batches = records.len().div_ceil(batch_size);
        let index = self.config.index.name.as_str();

        for (n, chunk) in records.chunks(batch_size).enumerate() {
            let batch = n + 1;
            let span = info_span!("upload_batch", index, batch, total_batches);
            async {
                let texts: Vec<String> = chunk.iter().map(embedding_text).collect();
                let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
                let vectors = self
                    .embedder
                    .embed_batch(&inputs)
                    .await
                    .map_err(|source| UploadError::Embed { batch, source })?;
                let payload: Vec<VectorRecord> = chunk
                    .iter()
                    .zip(vectors)
                    .map(|(record, values)| to_vector_record(record, values))
                    .collect();
                let upserted = self
                    .store
                    .upsert(index, &payload)
                    .await
                    .map_err(|source| UploadError::Batch {
                        batch,
                        records: payload.len(),
                        source,
                    })?;
                info!(records = upserted, "batch upserted");
                report.batches += 1;
                report.records_upserted += upserted;
                Ok::<_, UploadError>(())
            }
            .instrument(span)
            .await?;
        }

        info!(
            index,
            batches = report.batches,
            records = report.records_upserted,
            "upload complete"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarBill {
    pub id: String,
    pub score: f32,
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub issued_date: String,
    pub content: String,
}

pub async fn query_similar(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    index: &str,
    text: &str,
    top_k: usize,
) -> Result<Vec<SimilarBill>, SearchError> {
    let vector = embedder.embed(text).await?;
    let matches = store
        .query(
            index,
            &QueryRequest {
                vector,
                top_k,
                include_metadata: true,
            },
        )
        .await?;
    Ok(matches
        .into_iter()
        .map(|m| {
            let meta = m.metadata.unwrap_or_default();
            SimilarBill {
                id: m.id,
                score: m.score,
                title: meta.title,
                description: meta.description,
                source_url: meta.source_url,
                issued_date: meta.issued_date,
                content: meta.content,
            }
        })
        .collect())
}
