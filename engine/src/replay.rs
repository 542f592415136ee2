//! Event log replay.
//!
//! Current state is always the fold of an aggregate's full event sequence
//! from the empty initial state. Replay validates the sequence as it folds:
//! versions must be contiguous from 1, every event must target the same
//! aggregate, and nothing may follow a Delete. Create only starts a log,
//! Modify and Delete only apply to a live aggregate, and the patched result
//! must agree with the operation.

use crate::{
    diff::Differ, error::Result, Aggregate, AggregateId, Error, Event, FeatureDiff, Operation,
};

/// Fold `events` for aggregate `id` into its current state.
///
/// Events are ordered by version before folding. An empty sequence yields
/// [`Aggregate::initial`].
pub fn replay<T, D>(differ: &D, id: AggregateId, events: &[Event]) -> Result<Aggregate<T>>
where
    D: Differ<T, FeatureDiff> + ?Sized,
{
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by_key(|e| e.version);

    ordered
        .into_iter()
        .try_fold(Aggregate::initial(id), |state, event| apply(differ, state, event))
}

/// Apply a single event on top of `state`.
pub fn apply<T, D>(differ: &D, state: Aggregate<T>, event: &Event) -> Result<Aggregate<T>>
where
    D: Differ<T, FeatureDiff> + ?Sized,
{
    if event.aggregate_id != state.id {
        return Err(Error::AggregateMismatch {
            expected: state.id,
            actual: event.aggregate_id,
        });
    }

    let expected = state.version + 1;
    if event.version != expected {
        return Err(Error::VersionGap {
            aggregate_id: state.id,
            expected,
            actual: event.version,
        });
    }

    if state.version > 0 && state.data.is_none() {
        return Err(Error::OperationOnDeleted(state.id));
    }

    let fits_state = match event.operation {
        Operation::Create => state.version == 0,
        Operation::Modify | Operation::Delete => state.is_live(),
        Operation::NoOp => false,
    };
    if !fits_state {
        return Err(Error::UnsupportedOperation(format!(
            "{} event at version {} of aggregate {}",
            event.operation, event.version, state.id
        )));
    }

    let data = differ.patch(state.data.as_ref(), &event.payload)?;
    if data.is_some() == (event.operation == Operation::Delete) {
        return Err(Error::InvalidDiff(format!(
            "{} event at version {} of aggregate {} has a mismatched payload",
            event.operation, event.version, state.id
        )));
    }

    Ok(Aggregate {
        id: state.id,
        version: event.version,
        data,
    })
}
