//! Feature diff/patch codec.
//!
//! Combines a geometry primitive and an attribute primitive into a single
//! [`Differ`] over whole features, and turns classified pairs into events.
//!
//! Attribute documents travel as JSON. A creation carries the full document,
//! a deletion carries an empty string, a modification carries the attribute
//! primitive's delta.

use crate::{
    diff::{AttributeDiffer, Differ, GeometryDiffer},
    error::Result,
    geometry_diff::BinaryGeometryDiffer,
    json_diff::JsonDeltaDiffer,
    Error, Event, Feature, FeatureDiff, FeaturePair, Geometry, Operation, Timestamp,
};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

/// Feature codec built from the bundled primitives.
pub type FeatureCodec<G, A> = FeatureDiffPatch<G, A, BinaryGeometryDiffer<G>, JsonDeltaDiffer>;

/// Diff/patch over features, built from a geometry and an attribute primitive.
#[derive(Debug)]
pub struct FeatureDiffPatch<G, A, GD, AD> {
    geometry: GD,
    attributes: AD,
    _feature: PhantomData<fn() -> (G, A)>,
}

impl<G, A, GD, AD> FeatureDiffPatch<G, A, GD, AD> {
    /// Create a codec from its two primitives.
    pub fn new(geometry: GD, attributes: AD) -> Self {
        Self {
            geometry,
            attributes,
            _feature: PhantomData,
        }
    }
}

impl<G, A, GD: Clone, AD: Clone> Clone for FeatureDiffPatch<G, A, GD, AD> {
    fn clone(&self) -> Self {
        Self::new(self.geometry.clone(), self.attributes.clone())
    }
}

impl<G, A> Default for FeatureCodec<G, A> {
    fn default() -> Self {
        Self::new(BinaryGeometryDiffer::new(), JsonDeltaDiffer::new())
    }
}

impl<G, A, GD, AD> Differ<Feature<G, A>, FeatureDiff> for FeatureDiffPatch<G, A, GD, AD>
where
    G: Geometry,
    A: Serialize + DeserializeOwned,
    GD: GeometryDiffer<G>,
    AD: AttributeDiffer,
{
    fn diff(
        &self,
        before: Option<&Feature<G, A>>,
        after: Option<&Feature<G, A>>,
    ) -> Result<FeatureDiff> {
        match (before, after) {
            (None, None) => Err(Error::InvalidArgument(
                "cannot diff two absent features".into(),
            )),
            (None, Some(after)) => Ok(FeatureDiff::new(
                self.geometry.diff(None, Some(&after.geometry))?,
                serde_json::to_string(&after.attributes)?,
            )),
            (Some(before), None) => Ok(FeatureDiff::new(
                self.geometry.diff(Some(&before.geometry), None)?,
                String::new(),
            )),
            (Some(before), Some(after)) => {
                let old = serde_json::to_value(&before.attributes)?;
                let new = serde_json::to_value(&after.attributes)?;
                Ok(FeatureDiff::new(
                    self.geometry
                        .diff(Some(&before.geometry), Some(&after.geometry))?,
                    self.attributes.diff(&old, &new)?,
                ))
            }
        }
    }

    fn patch(
        &self,
        before: Option<&Feature<G, A>>,
        diff: &FeatureDiff,
    ) -> Result<Option<Feature<G, A>>> {
        if diff.attribute_diff.is_empty() {
            return Ok(None);
        }

        let geometry = self
            .geometry
            .patch(before.map(|f| &f.geometry), &diff.geometry_diff)?;
        let Some(geometry) = geometry else {
            return Ok(None);
        };

        let document = match before {
            None => serde_json::from_str(&diff.attribute_diff).map_err(|e| {
                Error::InvalidDiff(format!("attribute document is not JSON: {e}"))
            })?,
            Some(before) => {
                let old = serde_json::to_value(&before.attributes)?;
                self.attributes.patch(&old, &diff.attribute_diff)?
            }
        };
        let attributes = serde_json::from_value(document)?;

        Ok(Some(Feature::new(geometry, attributes)))
    }
}

/// Turns classified feature pairs into persistable events.
#[derive(Debug, Clone, Default)]
pub struct FeatureDiffer<D> {
    differ: D,
}

impl<D> FeatureDiffer<D> {
    /// Create a pair-to-event converter around a feature codec.
    pub fn new(differ: D) -> Self {
        Self { differ }
    }

    /// Access the underlying codec.
    pub fn codec(&self) -> &D {
        &self.differ
    }

    /// Build one event per changed pair, in input order.
    ///
    /// Pairs classified as NoOp produce no event.
    pub fn get_diffs<G, A>(
        &self,
        pairs: &[FeaturePair<G, A>],
        timestamp: Timestamp,
    ) -> Result<Vec<Event>>
    where
        D: Differ<Feature<G, A>, FeatureDiff>,
    {
        pairs
            .iter()
            .filter(|pair| pair.operation != Operation::NoOp)
            .map(|pair| self.to_event(pair, timestamp))
            .collect()
    }

    /// Build the event for a single changed pair.
    pub fn to_event<G, A>(&self, pair: &FeaturePair<G, A>, timestamp: Timestamp) -> Result<Event>
    where
        D: Differ<Feature<G, A>, FeatureDiff>,
    {
        if pair.operation == Operation::NoOp {
            return Err(Error::UnsupportedOperation(
                "no event is produced for an unchanged feature".into(),
            ));
        }
        let payload = self.differ.diff(pair.before(), pair.after())?;
        Ok(Event::new(
            pair.aggregate_id,
            pair.version,
            pair.operation,
            payload,
            timestamp,
        ))
    }
}
