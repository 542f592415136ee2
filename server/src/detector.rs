//! Change detection seam for the converter pipeline.

use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use geofold_engine::{Aggregate, Feature, FeaturePair, Geometry, IdentityChangeDetector};
use serde::Serialize;

use crate::error::Result;

/// Classifies a new snapshot against the current state of a dataset.
///
/// Every existing aggregate and every snapshot feature must appear in
/// exactly one returned pair.
#[async_trait]
pub trait ChangeDetector<G, A>: Send + Sync {
    async fn find_changes(
        &self,
        existing: Vec<Aggregate<Feature<G, A>>>,
        snapshot: Vec<Feature<G, A>>,
    ) -> Result<Vec<FeaturePair<G, A>>>;
}

#[async_trait]
impl<G, A, K> ChangeDetector<G, A> for IdentityChangeDetector<G, A, K>
where
    G: Geometry,
    A: Serialize + Send + Sync + 'static,
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    async fn find_changes(
        &self,
        existing: Vec<Aggregate<Feature<G, A>>>,
        snapshot: Vec<Feature<G, A>>,
    ) -> Result<Vec<FeaturePair<G, A>>> {
        Ok(IdentityChangeDetector::find_changes(self, existing, snapshot)?)
    }
}
