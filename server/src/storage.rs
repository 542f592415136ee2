//! Append-only event storage.
//!
//! Storage keeps each aggregate's events as a contiguous version sequence
//! starting at 1, grouped by dataset. It knows nothing about geometries or
//! attributes: payloads are opaque [`FeatureDiff`]s.

use async_trait::async_trait;
use geofold_engine::{AggregateId, DatasetId, Event, Version};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Event storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("version {version} of aggregate {aggregate_id} does not extend the stored log")]
    VersionConflict {
        aggregate_id: AggregateId,
        version: Version,
    },

    #[error("corrupt stored event: {0}")]
    Corrupt(String),

    #[error("event payload cannot be encoded: {0}")]
    Encoding(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistent, append-only event log.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Every aggregate that has at least one event in the dataset.
    async fn list_aggregate_ids(&self, dataset_id: DatasetId)
        -> Result<Vec<AggregateId>, StorageError>;

    /// Events of one aggregate, ordered by version.
    async fn list_events(
        &self,
        dataset_id: DatasetId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<Event>, StorageError>;

    /// Append one event. The version must directly follow the stored ones.
    async fn append_event(&self, dataset_id: DatasetId, event: Event) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct DatasetLog {
    /// Aggregate ids in order of first append
    order: Vec<AggregateId>,
    events: HashMap<AggregateId, Vec<Event>>,
}

/// Event storage held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryEventStorage {
    datasets: RwLock<HashMap<DatasetId, DatasetLog>>,
}

impl InMemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events in a dataset.
    pub async fn event_count(&self, dataset_id: DatasetId) -> usize {
        self.datasets
            .read()
            .await
            .get(&dataset_id)
            .map(|log| log.events.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn list_aggregate_ids(
        &self,
        dataset_id: DatasetId,
    ) -> Result<Vec<AggregateId>, StorageError> {
        Ok(self
            .datasets
            .read()
            .await
            .get(&dataset_id)
            .map(|log| log.order.clone())
            .unwrap_or_default())
    }

    async fn list_events(
        &self,
        dataset_id: DatasetId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<Event>, StorageError> {
        Ok(self
            .datasets
            .read()
            .await
            .get(&dataset_id)
            .and_then(|log| log.events.get(&aggregate_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn append_event(&self, dataset_id: DatasetId, event: Event) -> Result<(), StorageError> {
        let mut datasets = self.datasets.write().await;
        let log = datasets.entry(dataset_id).or_default();

        let stored = log.events.get(&event.aggregate_id).map_or(0, Vec::len) as Version;
        if event.version != stored + 1 {
            return Err(StorageError::VersionConflict {
                aggregate_id: event.aggregate_id,
                version: event.version,
            });
        }

        if stored == 0 {
            log.order.push(event.aggregate_id);
        }
        tracing::debug!(
            dataset_id = %dataset_id,
            aggregate_id = %event.aggregate_id,
            version = event.version,
            "Event appended"
        );
        log.events.entry(event.aggregate_id).or_default().push(event);
        Ok(())
    }
}
