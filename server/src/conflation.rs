//! Channel-backed conflation queue.
//!
//! Matched pairs are sent to the downstream reconciliation workflow over an
//! unbounded tokio channel. The queue can be cloned and shared between
//! concurrent conflation runs.

use geofold_engine::{ConflationOutcome, ConflationQueue, Conflator, Dataset, Feature, Result};
use tokio::sync::mpsc;

/// A matched pair awaiting reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflationTask<G, A, B> {
    pub a: Feature<G, A>,
    pub b: Feature<G, B>,
}

/// Receiving end held by the reconciliation workflow.
pub type ConflationReceiver<G, A, B> = mpsc::UnboundedReceiver<ConflationTask<G, A, B>>;

/// Queue sending matched pairs over a channel.
#[derive(Debug)]
pub struct ChannelConflationQueue<G, A, B> {
    sender: mpsc::UnboundedSender<ConflationTask<G, A, B>>,
}

impl<G, A, B> Clone for ChannelConflationQueue<G, A, B> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<G, A, B> ChannelConflationQueue<G, A, B> {
    /// Create a queue and the receiver draining it.
    pub fn new() -> (Self, ConflationReceiver<G, A, B>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl<G, A, B> ConflationQueue<G, A, B> for ChannelConflationQueue<G, A, B> {
    fn add_conflation_task(&self, a: Feature<G, A>, b: Feature<G, B>) -> Result<()> {
        self.sender
            .send(ConflationTask { a, b })
            .map_err(|_| geofold_engine::Error::QueueClosed)
    }
}

/// Conflate two datasets and log the outcome.
pub fn conflate_datasets<G, A, B, O, P, MA, MB, Q>(
    conflator: &mut Conflator<P, MA, MB, Q>,
    dataset_a: Dataset<G, A>,
    dataset_b: Dataset<G, B>,
) -> Result<ConflationOutcome<G, O>>
where
    P: FnMut(&Feature<G, A>, &Feature<G, B>) -> Result<bool>,
    MA: FnMut(A) -> O,
    MB: FnMut(B) -> O,
    Q: ConflationQueue<G, A, B>,
{
    let (id_a, id_b) = (dataset_a.dataset_id, dataset_b.dataset_id);
    let (a_len, b_len) = (dataset_a.features.len(), dataset_b.features.len());
    let outcome = conflator
        .conflate(dataset_a.features, dataset_b.features)
        .inspect_err(|e| {
            tracing::warn!(
                dataset_a = %id_a,
                dataset_b = %id_b,
                error = %e,
                "Conflation aborted"
            )
        })?;

    tracing::info!(
        dataset_a = %id_a,
        dataset_b = %id_b,
        features_a = a_len,
        features_b = b_len,
        queued = outcome.queued,
        passed_through = outcome.passed_through(),
        "Conflation finished"
    );

    Ok(outcome)
}
