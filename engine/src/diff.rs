//! Diff payloads and the seams for diff primitives.
//!
//! A [`FeatureDiff`] is the self-contained encoding of the transition between
//! two optional feature states. Its wire format is two length-prefixed blocks,
//! geometry first:
//!
//! ```text
//! [u32 LE length][geometry diff bytes][u32 LE length][utf8 attribute diff]
//! ```

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};

/// The encoded transition between two optional feature states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDiff {
    /// Output of the geometry diff primitive
    pub geometry_diff: Vec<u8>,
    /// Output of the attribute diff primitive, or a full JSON document
    /// for creations, or empty for deletions
    pub attribute_diff: String,
}

impl FeatureDiff {
    /// Create a new diff payload.
    pub fn new(geometry_diff: Vec<u8>, attribute_diff: impl Into<String>) -> Self {
        Self {
            geometry_diff,
            attribute_diff: attribute_diff.into(),
        }
    }

    /// Encode to the two-block wire format.
    ///
    /// Fails with [`Error::InvalidArgument`] when a block does not fit its
    /// u32 length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let attributes = self.attribute_diff.as_bytes();
        let geometry_len = wire_len(self.geometry_diff.len(), "geometry block")?;
        let attribute_len = wire_len(attributes.len(), "attribute block")?;

        let mut out = Vec::with_capacity(8 + self.geometry_diff.len() + attributes.len());
        out.extend_from_slice(&geometry_len.to_le_bytes());
        out.extend_from_slice(&self.geometry_diff);
        out.extend_from_slice(&attribute_len.to_le_bytes());
        out.extend_from_slice(attributes);
        Ok(out)
    }

    /// Decode from the two-block wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (geometry, rest) = read_block(bytes, "geometry")?;
        let (attributes, rest) = read_block(rest, "attribute")?;
        if !rest.is_empty() {
            return Err(Error::InvalidDiff(format!(
                "{} trailing bytes after attribute block",
                rest.len()
            )));
        }
        let attribute_diff = std::str::from_utf8(attributes)
            .map_err(|e| Error::InvalidDiff(format!("attribute block is not utf-8: {e}")))?;

        Ok(Self {
            geometry_diff: geometry.to_vec(),
            attribute_diff: attribute_diff.to_string(),
        })
    }
}

/// Narrow a length or offset to its u32 wire field.
pub(crate) fn wire_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::InvalidArgument(format!("{what} of {len} bytes exceeds the u32 wire limit"))
    })
}

fn read_block<'a>(bytes: &'a [u8], name: &str) -> Result<(&'a [u8], &'a [u8])> {
    let header: [u8; 4] = bytes
        .get(..4)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| Error::InvalidDiff(format!("missing {name} block length")))?;
    let len = u32::from_le_bytes(header) as usize;
    let body = &bytes[4..];
    if body.len() < len {
        return Err(Error::InvalidDiff(format!(
            "{name} block truncated: expected {len} bytes, found {}",
            body.len()
        )));
    }
    Ok(body.split_at(len))
}

/// A pair of inverse operations between two optional states and a delta.
pub trait Differ<T, D> {
    /// Produce the delta from `before` to `after`.
    fn diff(&self, before: Option<&T>, after: Option<&T>) -> Result<D>;

    /// Apply a delta to `before`, yielding the resulting state.
    fn patch(&self, before: Option<&T>, diff: &D) -> Result<Option<T>>;
}

/// Binary diff primitive for geometries.
pub trait GeometryDiffer<G> {
    /// Produce a binary delta between two optional geometries.
    fn diff(&self, before: Option<&G>, after: Option<&G>) -> Result<Vec<u8>>;

    /// Apply a binary delta to an optional geometry.
    fn patch(&self, before: Option<&G>, diff: &[u8]) -> Result<Option<G>>;
}

/// Structured diff primitive for JSON attribute documents.
pub trait AttributeDiffer {
    /// Produce a delta string turning `before` into `after`.
    fn diff(&self, before: &serde_json::Value, after: &serde_json::Value) -> Result<String>;

    /// Apply a delta string to `before`.
    fn patch(&self, before: &serde_json::Value, delta: &str) -> Result<serde_json::Value>;
}
