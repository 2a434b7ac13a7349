use billtrack_core::{CountObservation, DestinationSnapshot};
use chrono::Utc;
use tracing::{info, warn};

use crate::{StoreError, VectorStore};

/// What a destination probe learned about the index.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationProbe {
    pub observation: CountObservation,
    pub snapshot: Option<DestinationSnapshot>,
    pub index_exists: bool,
}

/// Counts the records in the destination index.
///
/// An index that does not exist yet counts as zero records. Any other failure is reported as
/// unavailable so the caller can apply its failure policy.
pub async fn probe_destination(store: &dyn VectorStore, index: &str) -> DestinationProbe {
    let indexes = match store.list_indexes().await {
        Ok(indexes) => indexes,
        Err(err) => return unavailable(index, err),
    };
    if !indexes.iter().any(|i| i.name == index) {
        info!(index, "destination index does not exist yet");
        return DestinationProbe {
            observation: CountObservation::Observed(0),
            snapshot: None,
            index_exists: false,
        };
    }

    match store.describe_index_stats(index).await {
        Ok(stats) => {
            let namespaces: std::collections::BTreeMap<String, u64> = stats
                .namespaces
                .iter()
                .map(|(name, ns)| (name.clone(), ns.record_count))
                .collect();
            let count = stats
                .total_record_count
                .unwrap_or_else(|| namespaces.values().sum());
            for (name, records) in &namespaces {
                info!(index, namespace = %name, records, "destination namespace");
            }
            info!(index, records = count, dimension = ?stats.dimension, "destination probed");
            DestinationProbe {
                observation: CountObservation::Observed(count),
                snapshot: Some(DestinationSnapshot {
                    index_name: index.to_string(),
                    record_count: count,
                    dimension: stats.dimension,
                    namespaces,
                    last_updated: Utc::now(),
                }),
                index_exists: true,
            }
        }
        Err(StoreError::IndexNotFound(_)) => DestinationProbe {
            observation: CountObservation::Observed(0),
            snapshot: None,
            index_exists: false,
        },
        Err(err) => unavailable(index, err),
    }
}

fn unavailable(index: &str, err: StoreError) -> DestinationProbe {
    warn!(index, error = %err, "destination count unavailable");
    DestinationProbe {
        observation: CountObservation::unavailable(err.to_string()),
        snapshot: None,
        index_exists: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        IndexDescription, IndexSpec, IndexStats, MemoryVectorStore, QueryMatch, QueryRequest,
    };
    use async_trait::async_trait;
    use billtrack_core::{VectorMetadata, VectorRecord};

    struct Unreachable;

    #[async_trait]
    impl VectorStore for Unreachable {
        async fn list_indexes(&self) -> Result<Vec<IndexDescription>, StoreError> {
            Err(StoreError::Status {
                operation: "list_indexes",
                status: 401,
                body: "unauthorized".into(),
            })
        }
        async fn create_index(&self, _: &IndexSpec) -> Result<(), StoreError> {
            unreachable!()
        }
        async fn describe_index_stats(&self, _: &str) -> Result<IndexStats, StoreError> {
            unreachable!()
        }
        async fn upsert(&self, _: &str, _: &[VectorRecord]) -> Result<usize, StoreError> {
            unreachable!()
        }
        async fn query(&self, _: &str, _: &QueryRequest) -> Result<Vec<QueryMatch>, StoreError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn absent_index_counts_as_zero() {
        let probe = probe_destination(&MemoryVectorStore::new(), "bill-tracker").await;
        assert_eq!(probe.observation, CountObservation::Observed(0));
        assert!(!probe.index_exists);
    }

    #[tokio::test]
    async fn existing_index_reports_count_and_snapshot() {
        let records = (0..3)
            .map(|i| VectorRecord {
                id: format!("s{i}"),
                values: vec![1.0, 0.0],
                metadata: VectorMetadata::default(),
            })
            .collect();
        let store = MemoryVectorStore::with_index("bill-tracker", 2, records).await;
        let probe = probe_destination(&store, "bill-tracker").await;
        assert_eq!(probe.observation.count(), Some(3));
        let snapshot = probe.snapshot.unwrap();
        assert_eq!(snapshot.dimension, Some(2));
        assert_eq!(snapshot.namespaces[""], 3);
    }

    #[tokio::test]
    async fn transport_failure_is_unavailable() {
        let probe = probe_destination(&Unreachable, "bill-tracker").await;
        assert!(!probe.observation.is_available());
    }
}
