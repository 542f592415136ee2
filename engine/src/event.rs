//! Event types for expressing per-aggregate changes.
//!
//! Each event carries the version its aggregate reaches after applying it,
//! so a well-formed stream for one aggregate reads 1, 2, 3, ...

use crate::{AggregateId, Error, FeatureDiff, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an event does to its aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Modify,
    Delete,
    /// Unchanged entity. Never persisted nor published.
    NoOp,
}

impl Operation {
    /// Classify a transition from the presence of its two states.
    ///
    /// Both states absent is invalid.
    pub fn from_states(before: bool, after: bool) -> Result<Self, Error> {
        match (before, after) {
            (false, false) => Err(Error::InvalidArgument(
                "cannot classify a transition between two absent states".into(),
            )),
            (false, true) => Ok(Operation::Create),
            (true, false) => Ok(Operation::Delete),
            (true, true) => Ok(Operation::Modify),
        }
    }

    /// Name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Modify => "modify",
            Operation::Delete => "delete",
            Operation::NoOp => "noop",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "modify" => Ok(Operation::Modify),
            "delete" => Ok(Operation::Delete),
            "noop" => Ok(Operation::NoOp),
            other => Err(Error::UnsupportedOperation(other.to_string())),
        }
    }
}

/// An immutable, versioned diff applied to one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Aggregate this event belongs to
    pub aggregate_id: AggregateId,
    /// Version the aggregate reaches after this event
    pub version: Version,
    /// Kind of change
    pub operation: Operation,
    /// Encoded transition between the two states
    pub payload: FeatureDiff,
    /// When the event was produced (milliseconds since epoch)
    pub timestamp: Timestamp,
}

impl Event {
    /// Create a new event.
    pub fn new(
        aggregate_id: AggregateId,
        version: Version,
        operation: Operation,
        payload: FeatureDiff,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            aggregate_id,
            version,
            operation,
            payload,
            timestamp,
        }
    }

    /// Check whether this event may be stored or published.
    pub fn is_persistable(&self) -> bool {
        self.operation != Operation::NoOp
    }
}
