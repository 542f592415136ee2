//! Feature, aggregate and dataset types.

use crate::{AggregateId, DatasetId, Operation, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A geospatial vector feature: a geometry plus an attribute record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature<G, A> {
    pub geometry: G,
    pub attributes: A,
}

impl<G, A> Feature<G, A> {
    /// Create a new feature.
    pub fn new(geometry: G, attributes: A) -> Self {
        Self {
            geometry,
            attributes,
        }
    }

    /// Replace the attributes, keeping the geometry.
    pub fn map_attributes<B>(self, f: impl FnOnce(A) -> B) -> Feature<G, B> {
        Feature {
            geometry: self.geometry,
            attributes: f(self.attributes),
        }
    }
}

/// The materialized state of one entity at a version.
///
/// Version 0 with no data is the implicit state before any event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate<T> {
    /// Aggregate identifier
    pub id: AggregateId,
    /// Version reached by the last applied event
    pub version: Version,
    /// Current data, `None` before creation and after deletion
    pub data: Option<T>,
}

impl<T> Aggregate<T> {
    /// The state before any event has been applied.
    pub fn initial(id: AggregateId) -> Self {
        Self {
            id,
            version: 0,
            data: None,
        }
    }

    /// Create an aggregate at a known version.
    pub fn new(id: AggregateId, version: Version, data: T) -> Self {
        Self {
            id,
            version,
            data: Some(data),
        }
    }

    /// Check whether the aggregate currently holds data.
    pub fn is_live(&self) -> bool {
        self.data.is_some()
    }
}

/// One full snapshot of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset<G, A> {
    pub dataset_id: DatasetId,
    pub features: Vec<Feature<G, A>>,
}

impl<G, A> Dataset<G, A> {
    /// Create a dataset snapshot.
    pub fn new(dataset_id: DatasetId, features: Vec<Feature<G, A>>) -> Self {
        Self {
            dataset_id,
            features,
        }
    }
}

/// A classified pairing of an existing aggregate with a new feature.
///
/// Produced by change detection; consumed when building events.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePair<G, A> {
    /// The aggregate as it stood before the snapshot, if any
    pub existing: Option<Aggregate<Feature<G, A>>>,
    /// The feature in the new snapshot, if any
    pub new_feature: Option<Feature<G, A>>,
    /// What happened to the entity
    pub operation: Operation,
    /// Aggregate the resulting event targets
    pub aggregate_id: AggregateId,
    /// Version the aggregate reaches after the event
    pub version: Version,
}

impl<G, A> FeaturePair<G, A> {
    /// Pair for a feature absent from the previous state.
    pub fn created(feature: Feature<G, A>) -> Self {
        Self {
            existing: None,
            new_feature: Some(feature),
            operation: Operation::Create,
            aggregate_id: Uuid::new_v4(),
            version: 1,
        }
    }

    /// Pair for an aggregate absent from the new snapshot.
    pub fn deleted(existing: Aggregate<Feature<G, A>>) -> Self {
        Self {
            aggregate_id: existing.id,
            version: existing.version + 1,
            existing: Some(existing),
            new_feature: None,
            operation: Operation::Delete,
        }
    }

    /// Pair for an entity present on both sides.
    pub fn matched(
        existing: Aggregate<Feature<G, A>>,
        feature: Feature<G, A>,
        operation: Operation,
    ) -> Self {
        Self {
            aggregate_id: existing.id,
            version: existing.version + 1,
            existing: Some(existing),
            new_feature: Some(feature),
            operation,
        }
    }

    /// The state before the change.
    pub fn before(&self) -> Option<&Feature<G, A>> {
        self.existing.as_ref().and_then(|a| a.data.as_ref())
    }

    /// The state after the change.
    pub fn after(&self) -> Option<&Feature<G, A>> {
        self.new_feature.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use serde_json::json;

    #[test]
    fn initial_aggregate() {
        let id = Uuid::new_v4();
        let aggregate: Aggregate<()> = Aggregate::initial(id);
        assert_eq!(aggregate.id, id);
        assert_eq!(aggregate.version, 0);
        assert!(!aggregate.is_live());
    }

    #[test]
    fn created_pair_gets_fresh_id_and_version_one() {
        let a = FeaturePair::created(Feature::new(Point::new(0.0, 0.0), json!({"id": 1})));
        let b = FeaturePair::created(Feature::new(Point::new(0.0, 0.0), json!({"id": 2})));

        assert_eq!(a.operation, Operation::Create);
        assert_eq!(a.version, 1);
        assert_ne!(a.aggregate_id, b.aggregate_id);
        assert!(a.before().is_none());
        assert!(a.after().is_some());
    }

    #[test]
    fn deleted_pair_bumps_version() {
        let id = Uuid::new_v4();
        let existing = Aggregate::new(id, 3, Feature::new(Point::new(1.0, 1.0), json!({"id": 1})));
        let pair = FeaturePair::deleted(existing);

        assert_eq!(pair.operation, Operation::Delete);
        assert_eq!(pair.aggregate_id, id);
        assert_eq!(pair.version, 4);
        assert!(pair.after().is_none());
    }

    #[test]
    fn map_attributes_keeps_geometry() {
        let feature = Feature::new(Point::new(1.0, 2.0), 7);
        let mapped = feature.map_attributes(|n| n.to_string());
        assert_eq!(mapped.attributes, "7");
        assert_eq!(mapped.geometry, Point::new(1.0, 2.0));
    }
}
