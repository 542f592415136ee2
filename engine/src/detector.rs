//! Identity-keyed change detection.
//!
//! Pairs the aggregates of the last known dataset state with the features of
//! a new full snapshot by a caller-defined identity key, and classifies every
//! entity as created, deleted, modified or unchanged.

use crate::{error::Result, Aggregate, Error, Feature, FeaturePair, Geometry, Operation};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

type KeyFn<A, K> = Arc<dyn Fn(&A) -> K + Send + Sync>;
type EqFn<A> = Arc<dyn Fn(&A, &A) -> bool + Send + Sync>;

/// Change detector matching entities on an identity key in their attributes.
pub struct IdentityChangeDetector<G, A, K> {
    key: KeyFn<A, K>,
    attributes_equal: Option<EqFn<A>>,
    _geometry: std::marker::PhantomData<fn() -> G>,
}

impl<G, A, K> Clone for IdentityChangeDetector<G, A, K> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            attributes_equal: self.attributes_equal.clone(),
            _geometry: std::marker::PhantomData,
        }
    }
}

impl<G, A, K> Debug for IdentityChangeDetector<G, A, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityChangeDetector")
            .field("custom_equality", &self.attributes_equal.is_some())
            .finish()
    }
}

impl<G, A, K> IdentityChangeDetector<G, A, K>
where
    G: Geometry,
    A: Serialize,
    K: Eq + Hash + Clone + Debug,
{
    /// Create a detector keyed by `key`.
    ///
    /// Attributes are considered equal when their JSON values are equal.
    pub fn new(key: impl Fn(&A) -> K + Send + Sync + 'static) -> Self {
        Self {
            key: Arc::new(key),
            attributes_equal: None,
            _geometry: std::marker::PhantomData,
        }
    }

    /// Builder-style method to compare attributes with a custom equality.
    pub fn with_attribute_equality(
        mut self,
        eq: impl Fn(&A, &A) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.attributes_equal = Some(Arc::new(eq));
        self
    }

    /// Classify every entity of `existing` and `snapshot`.
    ///
    /// Output order is deletes, then creates, then matched pairs (Modify or
    /// NoOp), each group in input order.
    pub fn find_changes(
        &self,
        existing: Vec<Aggregate<Feature<G, A>>>,
        snapshot: Vec<Feature<G, A>>,
    ) -> Result<Vec<FeaturePair<G, A>>> {
        let new_keys = self.index_snapshot(&snapshot)?;
        let mut old_index: HashMap<K, Aggregate<Feature<G, A>>> =
            HashMap::with_capacity(existing.len());
        let mut old_keys = HashSet::with_capacity(existing.len());

        let mut deleted = Vec::new();
        for aggregate in existing {
            let Some(data) = aggregate.data.as_ref() else {
                return Err(Error::MissingAggregate(format!(
                    "aggregate {} carries no data",
                    aggregate.id
                )));
            };
            let key = (self.key)(&data.attributes);
            if !old_keys.insert(key.clone()) {
                return Err(Error::DuplicateKey(format!("{key:?}"), "existing dataset"));
            }
            if new_keys.contains(&key) {
                old_index.insert(key, aggregate);
            } else {
                deleted.push(FeaturePair::deleted(aggregate));
            }
        }

        let mut created = Vec::new();
        let mut matched = Vec::new();
        for feature in snapshot {
            let key = (self.key)(&feature.attributes);
            if !old_keys.contains(&key) {
                created.push(FeaturePair::created(feature));
                continue;
            }
            let existing = old_index
                .remove(&key)
                .ok_or_else(|| Error::MissingAggregate(format!("{key:?}")))?;
            let unchanged = match existing.data.as_ref() {
                Some(before) => self.features_equal(before, &feature)?,
                None => return Err(Error::MissingAggregate(format!("{key:?}"))),
            };
            let operation = if unchanged {
                Operation::NoOp
            } else {
                Operation::Modify
            };
            matched.push(FeaturePair::matched(existing, feature, operation));
        }

        deleted.extend(created);
        deleted.extend(matched);
        Ok(deleted)
    }

    fn index_snapshot(&self, snapshot: &[Feature<G, A>]) -> Result<HashSet<K>> {
        let mut keys = HashSet::with_capacity(snapshot.len());
        for feature in snapshot {
            let key = (self.key)(&feature.attributes);
            if keys.contains(&key) {
                return Err(Error::DuplicateKey(format!("{key:?}"), "new snapshot"));
            }
            keys.insert(key);
        }
        Ok(keys)
    }

    fn features_equal(&self, a: &Feature<G, A>, b: &Feature<G, A>) -> Result<bool> {
        if a.geometry != b.geometry {
            return Ok(false);
        }
        match &self.attributes_equal {
            Some(eq) => Ok(eq(&a.attributes, &b.attributes)),
            None => Ok(serde_json::to_value(&a.attributes)? == serde_json::to_value(&b.attributes)?),
        }
    }
}

/// Identity key read from a named attribute of a JSON document.
///
/// The key is the compact JSON rendering of the value, so `7` and `"7"`
/// stay distinct. Missing attributes key as an empty string, which no JSON
/// value renders to; two features lacking the field collide as duplicates.
pub fn json_field_key(field: impl Into<String>) -> impl Fn(&serde_json::Value) -> String {
    let field = field.into();
    move |attributes: &serde_json::Value| {
        attributes
            .get(&field)
            .map(serde_json::Value::to_string)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn feature(id: i64, x: f64, name: &str) -> Feature<Point, Value> {
        Feature::new(Point::new(x, 0.0), json!({"id": id, "name": name}))
    }

    fn detector() -> IdentityChangeDetector<Point, Value, i64> {
        IdentityChangeDetector::new(|a: &Value| a["id"].as_i64().unwrap_or_default())
    }

    fn existing(features: Vec<Feature<Point, Value>>) -> Vec<Aggregate<Feature<Point, Value>>> {
        features
            .into_iter()
            .map(|f| Aggregate::new(Uuid::new_v4(), 2, f))
            .collect()
    }

    #[test]
    fn classifies_and_orders_pairs() {
        let old = existing(vec![feature(1, 0.0, "a"), feature(2, 1.0, "b"), feature(3, 2.0, "c")]);
        let new = vec![feature(2, 1.0, "b"), feature(4, 3.0, "d"), feature(3, 2.5, "c")];

        let pairs = detector().find_changes(old.clone(), new).unwrap();
        let ops: Vec<_> = pairs.iter().map(|p| p.operation).collect();
        assert_eq!(
            ops,
            vec![
                Operation::Delete,
                Operation::Create,
                Operation::NoOp,
                Operation::Modify
            ]
        );

        assert_eq!(pairs[0].aggregate_id, old[0].id);
        assert_eq!(pairs[0].version, 3);
        assert_eq!(pairs[1].version, 1);
        assert!(old.iter().all(|a| a.id != pairs[1].aggregate_id));
        assert_eq!(pairs[2].aggregate_id, old[1].id);
        assert_eq!(pairs[3].aggregate_id, old[2].id);
        assert_eq!(pairs[3].version, 3);
    }

    #[test]
    fn attribute_change_is_modify() {
        let old = existing(vec![feature(1, 0.0, "a")]);
        let pairs = detector()
            .find_changes(old, vec![feature(1, 0.0, "renamed")])
            .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].operation, Operation::Modify);
    }

    #[test]
    fn custom_equality_ignores_fields() {
        let old = existing(vec![feature(1, 0.0, "a")]);
        let detector = detector().with_attribute_equality(|a, b| a["id"] == b["id"]);
        let pairs = detector
            .find_changes(old, vec![feature(1, 0.0, "renamed")])
            .unwrap();
        assert_eq!(pairs[0].operation, Operation::NoOp);
    }

    #[test]
    fn empty_inputs() {
        assert!(detector().find_changes(vec![], vec![]).unwrap().is_empty());

        let pairs = detector()
            .find_changes(vec![], vec![feature(1, 0.0, "a"), feature(2, 0.0, "b")])
            .unwrap();
        assert!(pairs.iter().all(|p| p.operation == Operation::Create));

        let pairs = detector()
            .find_changes(existing(vec![feature(1, 0.0, "a")]), vec![])
            .unwrap();
        assert_eq!(pairs[0].operation, Operation::Delete);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let err = detector()
            .find_changes(vec![], vec![feature(1, 0.0, "a"), feature(1, 1.0, "b")])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_, "new snapshot")));

        let old = existing(vec![feature(1, 0.0, "a"), feature(1, 1.0, "b")]);
        let err = detector().find_changes(old, vec![]).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_, "existing dataset")));
    }

    #[test]
    fn aggregate_without_data_is_fatal() {
        let old = vec![Aggregate::initial(Uuid::new_v4())];
        assert!(matches!(
            detector().find_changes(old, vec![feature(1, 0.0, "a")]),
            Err(Error::MissingAggregate(_))
        ));
    }

    #[test]
    fn json_field_keys() {
        let key = json_field_key("code");
        assert_eq!(key(&json!({"code": "A1"})), "\"A1\"");
        assert_eq!(key(&json!({"code": 7})), "7");
        assert_eq!(key(&json!({})), "");
    }

    #[test]
    fn json_keys_keep_value_types_apart() {
        let key = json_field_key("code");
        assert_ne!(key(&json!({"code": 7})), key(&json!({"code": "7"})));
        assert_ne!(key(&json!({})), key(&json!({"code": "null"})));
        assert_ne!(key(&json!({})), key(&json!({"code": null})));
        assert_ne!(key(&json!({"code": true})), key(&json!({"code": "true"})));

        let detector = IdentityChangeDetector::<Point, Value, String>::new(json_field_key("code"));
        let snapshot = vec![
            Feature::new(Point::new(0.0, 0.0), json!({"code": 7})),
            Feature::new(Point::new(1.0, 0.0), json!({"code": "7"})),
        ];
        let pairs = detector.find_changes(vec![], snapshot).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.operation == Operation::Create));
    }
}
