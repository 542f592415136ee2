//! In-process publish/subscribe bus.
//!
//! Routes events to the callbacks subscribed to a dataset. Nothing is
//! buffered: an event published while a dataset has no subscribers is
//! dropped.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use geofold_engine::{DatasetId, Event};
use uuid::Uuid;

use crate::error::Result;

/// Handle returned by [`MessageBus::subscribe`].
pub type SubscriptionId = Uuid;

/// Callback receiving the events of one dataset.
pub type Subscriber = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Dataset-keyed subscriber registry.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Default)]
pub struct MessageBus {
    subscribers: DashMap<DatasetId, Vec<(SubscriptionId, Subscriber)>>,
}

impl MessageBus {
    /// Create a new bus.
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Create a new bus wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a callback for a dataset.
    pub fn subscribe<F, Fut>(&self, dataset_id: DatasetId, callback: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let subscriber: Subscriber = Arc::new(move |event| callback(event).boxed());
        self.subscribe_boxed(dataset_id, subscriber)
    }

    /// Register an already boxed callback for a dataset.
    pub fn subscribe_boxed(&self, dataset_id: DatasetId, subscriber: Subscriber) -> SubscriptionId {
        let subscription_id = Uuid::new_v4();
        self.subscribers
            .entry(dataset_id)
            .or_default()
            .push((subscription_id, subscriber));

        tracing::info!(
            dataset_id = %dataset_id,
            subscription_id = %subscription_id,
            "Subscriber registered"
        );

        subscription_id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, dataset_id: DatasetId, subscription_id: SubscriptionId) -> bool {
        let Some(mut subscribers) = self.subscribers.get_mut(&dataset_id) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != subscription_id);
        let removed = subscribers.len() != before;

        if subscribers.is_empty() {
            drop(subscribers);
            self.subscribers.remove(&dataset_id);
        }

        if removed {
            tracing::info!(
                dataset_id = %dataset_id,
                subscription_id = %subscription_id,
                "Subscriber removed"
            );
        }
        removed
    }

    /// Number of callbacks subscribed to a dataset.
    pub fn subscriber_count(&self, dataset_id: DatasetId) -> usize {
        self.subscribers
            .get(&dataset_id)
            .map_or(0, |subscribers| subscribers.len())
    }

    /// Deliver one event to every current subscriber of the dataset.
    ///
    /// Subscribers run one after another in subscription order. A failing
    /// subscriber is logged and skipped. Returns the number of successful
    /// deliveries.
    pub async fn publish(&self, dataset_id: DatasetId, event: &Event) -> usize {
        if !event.is_persistable() {
            tracing::warn!(
                dataset_id = %dataset_id,
                aggregate_id = %event.aggregate_id,
                "Dropping unpublishable noop event"
            );
            return 0;
        }

        // Release the shard lock before awaiting any callback.
        let subscribers = self.snapshot(dataset_id);

        let mut delivered = 0;
        for (subscription_id, subscriber) in subscribers {
            match subscriber(event.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    dataset_id = %dataset_id,
                    subscription_id = %subscription_id,
                    aggregate_id = %event.aggregate_id,
                    version = event.version,
                    error = %e,
                    "Subscriber failed"
                ),
            }
        }

        tracing::debug!(
            dataset_id = %dataset_id,
            aggregate_id = %event.aggregate_id,
            recipients = delivered,
            "Published event"
        );

        delivered
    }

    /// Deliver a batch of events in order.
    pub async fn publish_all(&self, dataset_id: DatasetId, events: &[Event]) -> usize {
        let mut delivered = 0;
        for event in events {
            delivered += self.publish(dataset_id, event).await;
        }
        delivered
    }

    fn snapshot(&self, dataset_id: DatasetId) -> Vec<(SubscriptionId, Subscriber)> {
        self.subscribers
            .get(&dataset_id)
            .map(|subscribers| subscribers.value().clone())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("datasets", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use geofold_engine::{FeatureDiff, Operation};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn event(version: u64) -> Event {
        Event::new(Uuid::nil(), version, Operation::Modify, FeatureDiff::default(), 0)
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = MessageBus::new();
        let dataset = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe(dataset, move |event: Event| {
            let tx = tx.clone();
            async move {
                tx.send(event.version)
                    .map_err(|e| AppError::Internal(e.to_string()))
            }
        });
        assert_eq!(bus.subscriber_count(dataset), 1);

        assert_eq!(bus.publish_all(dataset, &[event(1), event(2)]).await, 2);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_no_subscribers_is_a_no_op() {
        let bus = MessageBus::new();
        assert_eq!(bus.publish(Uuid::new_v4(), &event(1)).await, 0);
    }

    #[tokio::test]
    async fn test_subscription_order_and_isolation() {
        let bus = MessageBus::new();
        let dataset = Uuid::new_v4();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "failing", "last"] {
            let calls = Arc::clone(&calls);
            bus.subscribe(dataset, move |_event: Event| {
                calls.lock().unwrap().push(name);
                async move {
                    if name == "failing" {
                        Err(AppError::Internal("subscriber down".into()))
                    } else {
                        Ok(())
                    }
                }
            });
        }

        assert_eq!(bus.publish(dataset, &event(1)).await, 2);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "failing", "last"]);
    }

    #[tokio::test]
    async fn test_other_datasets_not_notified() {
        let bus = MessageBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        bus.subscribe(Uuid::new_v4(), move |event: Event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.version);
                Ok(())
            }
        });

        assert_eq!(bus.publish(Uuid::new_v4(), &event(1)).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = MessageBus::new();
        let dataset = Uuid::new_v4();
        let id = bus.subscribe(dataset, |_event: Event| async { Ok(()) });

        assert!(!bus.unsubscribe(dataset, Uuid::new_v4()));
        assert!(bus.unsubscribe(dataset, id));
        assert!(!bus.unsubscribe(dataset, id));
        assert_eq!(bus.subscriber_count(dataset), 0);
        assert_eq!(bus.publish(dataset, &event(1)).await, 0);
    }

    #[tokio::test]
    async fn test_noop_events_dropped() {
        let bus = MessageBus::new();
        let dataset = Uuid::new_v4();
        bus.subscribe(dataset, |_event: Event| async { Ok(()) });

        let noop = Event::new(Uuid::nil(), 1, Operation::NoOp, FeatureDiff::default(), 0);
        assert_eq!(bus.publish(dataset, &noop).await, 0);
    }
}
