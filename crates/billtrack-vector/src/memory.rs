use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use billtrack_core::VectorRecord;
use tokio::sync::Mutex;

use crate::{
    IndexDescription, IndexSpec, IndexStats, NamespaceStats, QueryMatch, QueryRequest, StoreError,
    VectorStore,
};

#[derive(Debug)]
struct MemoryIndex {
    dimension: u32,
    vectors: BTreeMap<String, VectorRecord>,
}

/// In-process vector store for offline runs and tests.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    indexes: Mutex<HashMap<String, MemoryIndex>>,
    upsert_calls: AtomicUsize,
    fail_upsert_after: Option<usize>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds an index with `records` vectors of the given dimension.
    pub async fn with_index(name: &str, dimension: u32, records: Vec<VectorRecord>) -> Self {
        let store = Self::new();
        let vectors = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        store.indexes.lock().await.insert(
            name.to_string(),
            MemoryIndex { dimension, vectors },
        );
        store
    }

    /// Makes every upsert after the first `calls` fail.
    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_upsert_after = Some(calls);
        self
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub async fn record_count(&self, index: &str) -> usize {
        self.indexes
            .lock()
            .await
            .get(index)
            .map_or(0, |i| i.vectors.len())
    }

    pub async fn get(&self, index: &str, id: &str) -> Option<VectorRecord> {
        self.indexes
            .lock()
            .await
            .get(index)
            .and_then(|i| i.vectors.get(id).cloned())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn list_indexes(&self) -> Result<Vec<IndexDescription>, StoreError> {
        let indexes = self.indexes.lock().await;
        let mut out: Vec<_> = indexes
            .iter()
            .map(|(name, index)| IndexDescription {
                name: name.clone(),
                host: format!("memory://{name}"),
                dimension: Some(index.dimension),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        self.indexes
            .lock()
            .await
            .entry(spec.name.clone())
            .or_insert_with(|| MemoryIndex {
                dimension: spec.dimension,
                vectors: BTreeMap::new(),
            });
        Ok(())
    }

    async fn describe_index_stats(&self, index: &str) -> Result<IndexStats, StoreError> {
        let indexes = self.indexes.lock().await;
        let found = indexes
            .get(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        let count = found.vectors.len() as u64;
        let mut namespaces = BTreeMap::new();
        if count > 0 {
            namespaces.insert(String::new(), NamespaceStats { record_count: count });
        }
        Ok(IndexStats {
            total_record_count: Some(count),
            dimension: Some(found.dimension),
            namespaces,
        })
    }

    async fn upsert(&self, index: &str, vectors: &[VectorRecord]) -> Result<usize, StoreError> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upsert_after.is_some_and(|limit| call >= limit) {
            return Err(StoreError::Status {
                operation: "upsert",
                status: 503,
                body: "injected failure".to_string(),
            });
        }
        let mut indexes = self.indexes.lock().await;
        let target = indexes
            .get_mut(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        for vector in vectors {
            if vector.values.len() != target.dimension as usize {
                return Err(StoreError::Dimension {
                    id: vector.id.clone(),
                    expected: target.dimension,
                    actual: vector.values.len(),
                });
            }
        }
        for vector in vectors {
            target.vectors.insert(vector.id.clone(), vector.clone());
        }
        Ok(vectors.len())
    }

    async fn query(
        &self,
        index: &str,
        request: &QueryRequest,
    ) -> Result<Vec<QueryMatch>, StoreError> {
        let indexes = self.indexes.lock().await;
        let target = indexes
            .get(index)
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))?;
        let mut matches: Vec<QueryMatch> = target
            .vectors
            .values()
            .map(|record| QueryMatch {
                id: record.id.clone(),
                score: cosine(&request.vector, &record.values),
                metadata: request.include_metadata.then(|| record.metadata.clone()),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(request.top_k);
        Ok(matches)
    }
}
