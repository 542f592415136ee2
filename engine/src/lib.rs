//! # Geofold Engine
//!
//! Event sourcing for bulk-replaced geospatial vector datasets.
//!
//! Each new full snapshot of a dataset is compared against the last known
//! state, reduced to per-entity create/modify/delete diffs, and turned into
//! immutable, versioned events. Replaying an entity's events reconstructs its
//! current state.
//!
//! ## Design Principles
//!
//! - **No IO**: storage, messaging and projections live in the server crate
//! - **Deterministic**: the same inputs produce the same events, except for
//!   freshly generated aggregate ids
//! - **Generic**: works over any [`Geometry`] and any serializable attribute
//!   record
//!
//! ## Core Concepts
//!
//! ### Features and Aggregates
//!
//! A [`Feature`] is a geometry plus an attribute record. An [`Aggregate`] is
//! the materialized state of one entity at a version; version 0 with no data
//! is the state before any event.
//!
//! ### Change Detection
//!
//! [`IdentityChangeDetector`] pairs existing aggregates with the features of
//! a new snapshot by an identity key and classifies each entity as
//! [`Operation::Create`], [`Operation::Modify`], [`Operation::Delete`] or
//! [`Operation::NoOp`].
//!
//! ### Diff Codec
//!
//! [`FeatureDiffPatch`] combines a geometry primitive
//! ([`BinaryGeometryDiffer`]) and an attribute primitive ([`JsonDeltaDiffer`])
//! into a [`Differ`] over features. Its [`FeatureDiff`] payload has a compact
//! two-block wire format.
//!
//! ### Replay
//!
//! [`replay`] folds an aggregate's events into its current state, rejecting
//! version gaps and events after a deletion.
//!
//! ### Conflation
//!
//! [`Conflator`] pairs two heterogeneous datasets greedily and hands matched
//! pairs to a [`ConflationQueue`] for downstream reconciliation.
//!
//! ## Quick Start
//!
//! ```rust
//! use geofold_engine::{
//!     replay, Aggregate, Feature, FeatureCodec, FeatureDiffer, IdentityChangeDetector,
//!     Operation, Point,
//! };
//! use serde_json::{json, Value};
//!
//! // 1. Pick a change detector keyed on the "id" attribute
//! let detector = IdentityChangeDetector::<Point, Value, i64>::new(|a: &Value| {
//!     a["id"].as_i64().unwrap_or_default()
//! });
//!
//! // 2. Detect changes between an empty dataset and a first snapshot
//! let snapshot = vec![Feature::new(Point::new(1.0, 2.0), json!({"id": 1, "name": "v1"}))];
//! let pairs = detector.find_changes(vec![], snapshot).unwrap();
//! assert_eq!(pairs[0].operation, Operation::Create);
//!
//! // 3. Turn the pairs into events
//! let differ = FeatureDiffer::new(FeatureCodec::<Point, Value>::default());
//! let events = differ.get_diffs(&pairs, 1706745600000).unwrap();
//!
//! // 4. Replay the log
//! let id = events[0].aggregate_id;
//! let aggregate: Aggregate<Feature<Point, Value>> =
//!     replay(differ.codec(), id, &events).unwrap();
//! assert_eq!(aggregate.version, 1);
//! assert_eq!(aggregate.data.unwrap().attributes["name"], "v1");
//! ```

pub mod codec;
pub mod conflate;
pub mod detector;
pub mod diff;
pub mod error;
pub mod event;
pub mod feature;
pub mod geometry;
pub mod geometry_diff;
pub mod json_diff;
pub mod replay;
pub mod schema;

// Re-export main types at crate root
pub use codec::{FeatureCodec, FeatureDiffPatch, FeatureDiffer};
pub use conflate::{ConflationOutcome, ConflationQueue, Conflator};
pub use detector::{json_field_key, IdentityChangeDetector};
pub use diff::{AttributeDiffer, Differ, FeatureDiff, GeometryDiffer};
pub use error::{Error, Result};
pub use event::{Event, Operation};
pub use feature::{Aggregate, Dataset, Feature, FeaturePair};
pub use geometry::{Coord, Geometry, LineString, Point, Polygon, Shape};
pub use geometry_diff::BinaryGeometryDiffer;
pub use json_diff::JsonDeltaDiffer;
pub use replay::replay;
pub use schema::{AttributeSchema, FieldDef, FieldType, Schema};

/// Type aliases for clarity
pub type AggregateId = uuid::Uuid;
pub type DatasetId = uuid::Uuid;
pub type Version = u64;
pub type Timestamp = u64;
