//! Geofold Server - event store, projections and HTTP surface for geofold.
//!
//! Snapshots posted for a dataset are diffed against the replayed event log
//! by the geofold-engine change detector; the resulting events are stored,
//! then published to projection writers and other subscribers.

pub mod bus;
pub mod config;
pub mod conflation;
pub mod converter;
pub mod db;
pub mod detector;
pub mod error;
pub mod projection;
pub mod routes;
pub mod sink;
pub mod storage;
pub mod store_api;

use std::sync::Arc;

use axum::Router;
use dashmap::DashMap;
use geofold_engine::{json_field_key, DatasetId, IdentityChangeDetector, Shape};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bus::{MessageBus, SubscriptionId};
use crate::config::Config;
use crate::converter::EventSourceConverter;
use crate::sink::TabularSink;
use crate::storage::EventStorage;
use crate::store_api::EventStoreApi;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: EventStoreApi<Shape, Value>,
    pub bus: Arc<MessageBus>,
    pub sink: Arc<dyn TabularSink>,
    pub converter: Arc<EventSourceConverter<Shape, Value>>,
    /// Bus subscription of each projected dataset, `None` while the
    /// projection is being provisioned
    pub projections: Arc<DashMap<DatasetId, Option<SubscriptionId>>>,
}

impl AppState {
    /// Wire the pipeline over the given storage and sink.
    pub fn new(config: Config, storage: Arc<dyn EventStorage>, sink: Arc<dyn TabularSink>) -> Self {
        let store = EventStoreApi::new(storage);
        let bus = MessageBus::new_shared();
        let detector = IdentityChangeDetector::<Shape, Value, String>::new(json_field_key(
            config.identity_field.clone(),
        ));
        let converter =
            EventSourceConverter::new(Arc::new(detector), store.clone(), Arc::clone(&bus));

        Self {
            config: Arc::new(config),
            store,
            bus,
            sink,
            converter: Arc::new(converter),
            projections: Arc::new(DashMap::new()),
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
