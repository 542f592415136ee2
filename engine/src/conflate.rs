//! Greedy conflation of two heterogeneous datasets.
//!
//! Every feature of dataset A is paired with the first still-unpaired feature
//! of dataset B accepted by the caller's predicate. Matched pairs are not
//! merged here: they are handed to a [`ConflationQueue`] for downstream
//! reconciliation. Unmatched features from either side pass through with
//! their attributes mapped to a common output type.
//!
//! Matching is first-fit, not an optimal assignment, so results depend on
//! the order of both inputs.

use crate::{error::Result, Feature};
use std::sync::Arc;

/// Sink for matched pairs awaiting reconciliation.
pub trait ConflationQueue<G, A, B> {
    /// Enqueue one matched pair.
    fn add_conflation_task(&self, a: Feature<G, A>, b: Feature<G, B>) -> Result<()>;
}

impl<G, A, B, Q> ConflationQueue<G, A, B> for &Q
where
    Q: ConflationQueue<G, A, B> + ?Sized,
{
    fn add_conflation_task(&self, a: Feature<G, A>, b: Feature<G, B>) -> Result<()> {
        (**self).add_conflation_task(a, b)
    }
}

impl<G, A, B, Q> ConflationQueue<G, A, B> for Arc<Q>
where
    Q: ConflationQueue<G, A, B> + ?Sized,
{
    fn add_conflation_task(&self, a: Feature<G, A>, b: Feature<G, B>) -> Result<()> {
        (**self).add_conflation_task(a, b)
    }
}

/// Result of one conflation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflationOutcome<G, O> {
    /// Unmatched features: A pass-throughs in A order, then B in B order
    pub features: Vec<Feature<G, O>>,
    /// Number of pairs handed to the queue
    pub queued: usize,
}

impl<G, O> ConflationOutcome<G, O> {
    /// Number of features passed through unmatched.
    pub fn passed_through(&self) -> usize {
        self.features.len()
    }
}

/// Greedy first-match conflator.
pub struct Conflator<P, MA, MB, Q> {
    should_conflate: P,
    map_a: MA,
    map_b: MB,
    queue: Q,
}

impl<P, MA, MB, Q> Conflator<P, MA, MB, Q> {
    /// Create a conflator from a match predicate, two attribute mappers and
    /// the queue receiving matched pairs.
    pub fn new(should_conflate: P, map_a: MA, map_b: MB, queue: Q) -> Self {
        Self {
            should_conflate,
            map_a,
            map_b,
            queue,
        }
    }

    /// Access the queue.
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Conflate two datasets.
    ///
    /// All pairing happens before anything is queued, so a failing predicate
    /// leaves the queue untouched. Queue errors abort the run.
    pub fn conflate<G, A, B, O>(
        &mut self,
        dataset_a: Vec<Feature<G, A>>,
        dataset_b: Vec<Feature<G, B>>,
    ) -> Result<ConflationOutcome<G, O>>
    where
        P: FnMut(&Feature<G, A>, &Feature<G, B>) -> Result<bool>,
        MA: FnMut(A) -> O,
        MB: FnMut(B) -> O,
        Q: ConflationQueue<G, A, B>,
    {
        let mut remaining: Vec<Option<Feature<G, B>>> = dataset_b.into_iter().map(Some).collect();
        let mut unmatched_a = Vec::new();
        let mut matches = Vec::new();

        for a in dataset_a {
            let mut hit = None;
            for (idx, slot) in remaining.iter().enumerate() {
                if let Some(b) = slot {
                    if (self.should_conflate)(&a, b)? {
                        hit = Some(idx);
                        break;
                    }
                }
            }
            match hit.and_then(|idx| remaining[idx].take()) {
                Some(b) => matches.push((a, b)),
                None => unmatched_a.push(a),
            }
        }

        let queued = matches.len();
        for (a, b) in matches {
            self.queue.add_conflation_task(a, b)?;
        }

        let map_a = &mut self.map_a;
        let map_b = &mut self.map_b;
        let features = unmatched_a
            .into_iter()
            .map(|f| f.map_attributes(&mut *map_a))
            .chain(
                remaining
                    .into_iter()
                    .flatten()
                    .map(|f| f.map_attributes(&mut *map_b)),
            )
            .collect();

        Ok(ConflationOutcome { features, queued })
    }
}
