//! Binary geometry diff primitive.
//!
//! Works purely on the WKB encoding of a geometry, so any [`Geometry`] is
//! supported. A payload is a tag byte followed by a body:
//!
//! - `0`: the result is absent (deletion). Empty body.
//! - `1`: full replacement. The body is the WKB of the result.
//! - `2`: byte splice over the base WKB, used when both encodings have the
//!   same length (same kind and shape, moved vertices). The body is
//!   `[u32 base length][u64 FNV-1a hash of base]` followed by runs of
//!   `[u32 offset][u32 length][bytes]`.
//!
//! All integers are little-endian.

use crate::{
    diff::{wire_len, GeometryDiffer},
    error::Result,
    Error, Geometry,
};
use std::marker::PhantomData;

const TAG_ABSENT: u8 = 0;
const TAG_REPLACE: u8 = 1;
const TAG_SPLICE: u8 = 2;

/// Equal bytes tolerated inside one run before it is split.
const MAX_RUN_GAP: usize = 8;

/// Geometry differ operating on WKB bytes.
#[derive(Debug)]
pub struct BinaryGeometryDiffer<G> {
    _geometry: PhantomData<fn() -> G>,
}

impl<G> BinaryGeometryDiffer<G> {
    pub fn new() -> Self {
        Self {
            _geometry: PhantomData,
        }
    }
}

impl<G> Default for BinaryGeometryDiffer<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> Clone for BinaryGeometryDiffer<G> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<G: Geometry> GeometryDiffer<G> for BinaryGeometryDiffer<G> {
    fn diff(&self, before: Option<&G>, after: Option<&G>) -> Result<Vec<u8>> {
        let after = match after {
            Some(after) => after.to_wkb(),
            None => return Ok(vec![TAG_ABSENT]),
        };

        let mut replace = Vec::with_capacity(1 + after.len());
        replace.push(TAG_REPLACE);
        replace.extend_from_slice(&after);

        let Some(before) = before else {
            return Ok(replace);
        };

        let base = before.to_wkb();
        if base.len() != after.len() {
            return Ok(replace);
        }

        let splice = encode_splice(&base, &after)?;
        Ok(if splice.len() < replace.len() {
            splice
        } else {
            replace
        })
    }

    fn patch(&self, before: Option<&G>, diff: &[u8]) -> Result<Option<G>> {
        let (&tag, body) = diff
            .split_first()
            .ok_or_else(|| Error::InvalidDiff("empty geometry diff".into()))?;

        match tag {
            TAG_ABSENT if body.is_empty() => Ok(None),
            TAG_ABSENT => Err(Error::InvalidDiff(
                "absent geometry diff carries a body".into(),
            )),
            TAG_REPLACE => G::from_wkb(body).map(Some),
            TAG_SPLICE => {
                let before = before.ok_or_else(|| {
                    Error::InvalidDiff("splice diff applied without a base geometry".into())
                })?;
                let patched = apply_splice(before.to_wkb(), body)?;
                G::from_wkb(&patched).map(Some)
            }
            other => Err(Error::InvalidDiff(format!(
                "unknown geometry diff tag {other}"
            ))),
        }
    }
}

fn encode_splice(base: &[u8], target: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![TAG_SPLICE];
    out.extend_from_slice(&wire_len(base.len(), "splice base")?.to_le_bytes());
    out.extend_from_slice(&fnv1a(base).to_le_bytes());

    let n = base.len();
    let mut i = 0;
    while i < n {
        if base[i] == target[i] {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i + 1;
        let mut j = end;
        while j < n && j - end < MAX_RUN_GAP {
            if base[j] != target[j] {
                end = j + 1;
            }
            j += 1;
        }
        out.extend_from_slice(&wire_len(start, "splice offset")?.to_le_bytes());
        out.extend_from_slice(&wire_len(end - start, "splice run")?.to_le_bytes());
        out.extend_from_slice(&target[start..end]);
        i = end;
    }
    Ok(out)
}

fn apply_splice(mut base: Vec<u8>, body: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = Cursor { bytes: body, pos: 0 };
    let expected_len = cursor.u32()? as usize;
    let expected_hash = cursor.u64()?;
    if base.len() != expected_len || fnv1a(&base) != expected_hash {
        return Err(Error::InvalidDiff(
            "splice diff does not match the base geometry".into(),
        ));
    }

    while !cursor.is_done() {
        let offset = cursor.u32()? as usize;
        let len = cursor.u32()? as usize;
        let bytes = cursor.take(len)?;
        let target = base
            .get_mut(offset..offset + len)
            .ok_or_else(|| Error::InvalidDiff("splice run out of bounds".into()))?;
        target.copy_from_slice(bytes);
    }
    Ok(base)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or_else(|| Error::InvalidDiff("truncated splice diff".into()))?;
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn is_done(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{LineString, Point, Polygon, Shape};

    fn differ<G>() -> BinaryGeometryDiffer<G> {
        BinaryGeometryDiffer::new()
    }

    #[test]
    fn create_is_full_replacement() {
        let point = Point::new(1.0, 2.0);
        let diff = differ::<Point>().diff(None, Some(&point)).unwrap();
        assert_eq!(diff[0], TAG_REPLACE);
        assert_eq!(&diff[1..], point.to_wkb().as_slice());
        assert_eq!(differ::<Point>().patch(None, &diff).unwrap(), Some(point));
    }

    #[test]
    fn delete_is_absent_tag() {
        let point = Point::new(1.0, 2.0);
        let diff = differ::<Point>().diff(Some(&point), None).unwrap();
        assert_eq!(diff, vec![TAG_ABSENT]);
        assert_eq!(differ::<Point>().patch(Some(&point), &diff).unwrap(), None);
    }

    #[test]
    fn moved_vertex_uses_splice() {
        let before = LineString::new([(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
        let after = LineString::new([(0.0, 0.0), (1.0, 1.0), (2.0, 2.5), (3.0, 3.0)]);

        let diff = differ::<LineString>().diff(Some(&before), Some(&after)).unwrap();
        assert_eq!(diff[0], TAG_SPLICE);
        assert!(diff.len() < 1 + after.to_wkb().len());
        assert_eq!(differ::<LineString>().patch(Some(&before), &diff).unwrap(), Some(after));
    }

    #[test]
    fn reshaped_geometry_falls_back_to_replace() {
        let before = Shape::from(LineString::new([(0.0, 0.0), (1.0, 1.0)]));
        let after = Shape::from(Polygon::square((5.0, 5.0).into(), 1.0));

        let diff = differ::<Shape>().diff(Some(&before), Some(&after)).unwrap();
        assert_eq!(diff[0], TAG_REPLACE);
        assert_eq!(differ::<Shape>().patch(Some(&before), &diff).unwrap(), Some(after));
    }

    #[test]
    fn identical_geometries_produce_empty_splice() {
        let point = Point::new(4.0, 4.0).with_srid(4326);
        let diff = differ::<Point>().diff(Some(&point), Some(&point)).unwrap();
        assert_eq!(diff.len(), 1 + 4 + 8);
        assert_eq!(differ::<Point>().patch(Some(&point), &diff).unwrap(), Some(point));
    }

    #[test]
    fn splice_on_wrong_base_rejected() {
        let before = LineString::new([(1.0, 2.0), (3.0, 4.0), (5.0, 6.0)]);
        let after = LineString::new([(1.0, 1.0), (3.0, 4.0), (5.0, 6.0)]);
        let diff = differ::<LineString>().diff(Some(&before), Some(&after)).unwrap();
        assert_eq!(diff[0], TAG_SPLICE);

        let other = LineString::new([(9.0, 9.0), (3.0, 4.0), (5.0, 6.0)]);
        assert!(matches!(
            differ::<LineString>().patch(Some(&other), &diff),
            Err(Error::InvalidDiff(_))
        ));
        assert!(matches!(
            differ::<LineString>().patch(None, &diff),
            Err(Error::InvalidDiff(_))
        ));
    }

    #[test]
    fn malformed_payloads_rejected() {
        let d = differ::<Point>();
        assert!(d.patch(None, &[]).is_err());
        assert!(d.patch(None, &[TAG_ABSENT, 1]).is_err());
        assert!(d.patch(None, &[9]).is_err());
        assert!(d.patch(None, &[TAG_REPLACE, 1, 2]).is_err());
    }
}
