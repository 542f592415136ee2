//! Typed access to the event log.
//!
//! Reconstructs aggregates by replaying their stored events and appends new
//! events on behalf of the converter pipeline.

use std::sync::Arc;

use futures::future::try_join_all;
use geofold_engine::{
    replay, Aggregate, AggregateId, DatasetId, Event, Feature, FeatureCodec, Geometry,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AppError, Result};
use crate::storage::EventStorage;

/// Replay and append over an [`EventStorage`].
pub struct EventStoreApi<G, A> {
    storage: Arc<dyn EventStorage>,
    codec: FeatureCodec<G, A>,
}

impl<G, A> Clone for EventStoreApi<G, A> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            codec: self.codec.clone(),
        }
    }
}

impl<G, A> EventStoreApi<G, A>
where
    G: Geometry,
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a store API over the given storage.
    pub fn new(storage: Arc<dyn EventStorage>) -> Self {
        Self {
            storage,
            codec: FeatureCodec::default(),
        }
    }

    /// Replay one aggregate's full log.
    ///
    /// An aggregate without events comes back at version 0 with no data.
    pub async fn aggregate_at_latest_version(
        &self,
        dataset_id: DatasetId,
        aggregate_id: AggregateId,
    ) -> Result<Aggregate<Feature<G, A>>> {
        let events = self.storage.list_events(dataset_id, aggregate_id).await?;
        Ok(replay(&self.codec, aggregate_id, &events)?)
    }

    /// Replay every aggregate of the dataset, deleted ones included.
    pub async fn all_aggregates(
        &self,
        dataset_id: DatasetId,
    ) -> Result<Vec<Aggregate<Feature<G, A>>>> {
        let ids = self.storage.list_aggregate_ids(dataset_id).await?;
        try_join_all(
            ids.into_iter()
                .map(|id| self.aggregate_at_latest_version(dataset_id, id)),
        )
        .await
    }

    /// The current dataset: every aggregate that still holds data.
    pub async fn dataset_at_latest_version(
        &self,
        dataset_id: DatasetId,
    ) -> Result<Vec<Aggregate<Feature<G, A>>>> {
        let aggregates = self.all_aggregates(dataset_id).await?;
        let total = aggregates.len();
        let live: Vec<_> = aggregates.into_iter().filter(|a| a.is_live()).collect();

        tracing::debug!(
            dataset_id = %dataset_id,
            live = live.len(),
            deleted = total - live.len(),
            "Dataset replayed"
        );

        Ok(live)
    }

    /// Append a single event.
    pub async fn save_event(&self, dataset_id: DatasetId, event: Event) -> Result<()> {
        ensure_persistable(&event)?;
        self.storage.append_event(dataset_id, event).await?;
        Ok(())
    }

    /// Append a batch of events concurrently.
    ///
    /// The batch is checked before anything is written; appends are not
    /// atomic across aggregates.
    pub async fn save_events(&self, dataset_id: DatasetId, events: Vec<Event>) -> Result<()> {
        events.iter().try_for_each(ensure_persistable)?;
        let count = events.len();

        try_join_all(
            events
                .into_iter()
                .map(|event| self.storage.append_event(dataset_id, event)),
        )
        .await?;

        tracing::info!(dataset_id = %dataset_id, count, "Events saved");
        Ok(())
    }
}

fn ensure_persistable(event: &Event) -> Result<()> {
    if event.is_persistable() {
        Ok(())
    } else {
        Err(AppError::Engine(geofold_engine::Error::UnsupportedOperation(format!(
            "refusing to store {} event for aggregate {}",
            event.operation, event.aggregate_id
        ))))
    }
}
