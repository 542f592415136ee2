//! Error types for the geofold engine.

use crate::{AggregateId, Version};
use thiserror::Error;

/// All possible errors from the geofold engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Argument errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid diff: {0}")]
    InvalidDiff(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("type mismatch for field {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Change detection errors
    #[error("no existing aggregate for matched key {0}")]
    MissingAggregate(String),

    #[error("duplicate identity key {0} in {1}")]
    DuplicateKey(String, &'static str),

    // Replay errors
    #[error("version gap for aggregate {aggregate_id}: expected {expected}, got {actual}")]
    VersionGap {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    #[error("event for aggregate {actual} replayed onto aggregate {expected}")]
    AggregateMismatch {
        expected: AggregateId,
        actual: AggregateId,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("operation on deleted aggregate: {0}")]
    OperationOnDeleted(AggregateId),

    // Conflation errors
    #[error("conflation queue closed")]
    QueueClosed,

    #[error("conflation predicate failed: {0}")]
    Predicate(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
