//! Geometry capability and a small concrete geometry model.
//!
//! The engine needs exactly two things from a geometry: exact equality and a
//! binary encoding. [`Geometry`] captures that capability. [`Point`],
//! [`LineString`], [`Polygon`] and the mixed-kind [`Shape`] implement it using
//! EWKB: little-endian, with the SRID embedded when one is set.

use crate::{error::Result, Error};
use std::fmt;

/// WKB type code for points.
pub const WKB_POINT: u32 = 1;
/// WKB type code for line strings.
pub const WKB_LINESTRING: u32 = 2;
/// WKB type code for polygons.
pub const WKB_POLYGON: u32 = 3;

/// EWKB flag marking that a u32 SRID follows the type code.
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
/// EWKB Z and M flags. Neither is supported.
const EWKB_ZM_FLAGS: u32 = 0xC000_0000;

/// Capability required from any geometry flowing through the engine.
pub trait Geometry: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Lower-case type name used for projection columns.
    fn type_name() -> &'static str;

    /// Encode as little-endian (E)WKB.
    fn to_wkb(&self) -> Vec<u8>;

    /// Decode from (E)WKB in either byte order.
    fn from_wkb(bytes: &[u8]) -> Result<Self>;
}

/// A 2D coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl From<(f64, f64)> for Coord {
    fn from((x, y): (f64, f64)) -> Self {
        Coord { x, y }
    }
}

/// A single position.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub coord: Coord,
    pub srid: Option<u32>,
}

/// An ordered sequence of positions.
#[derive(Debug, Clone, PartialEq)]
pub struct LineString {
    pub coords: Vec<Coord>,
    pub srid: Option<u32>,
}

/// A polygon given as its rings; the first ring is the exterior.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Vec<Coord>>,
    pub srid: Option<u32>,
}

/// Any of the supported geometry kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Point),
    LineString(LineString),
    Polygon(Polygon),
}

impl Point {
    /// Create a point without an SRID.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            coord: Coord { x, y },
            srid: None,
        }
    }

    /// Builder-style method to set the SRID.
    pub fn with_srid(mut self, srid: u32) -> Self {
        self.srid = Some(srid);
        self
    }
}

impl LineString {
    /// Create a line string without an SRID.
    pub fn new(coords: impl IntoIterator<Item = impl Into<Coord>>) -> Self {
        Self {
            coords: coords.into_iter().map(Into::into).collect(),
            srid: None,
        }
    }

    /// Builder-style method to set the SRID.
    pub fn with_srid(mut self, srid: u32) -> Self {
        self.srid = Some(srid);
        self
    }
}

impl Polygon {
    /// Create a polygon from an exterior ring only.
    pub fn new(exterior: impl IntoIterator<Item = impl Into<Coord>>) -> Self {
        Self {
            rings: vec![exterior.into_iter().map(Into::into).collect()],
            srid: None,
        }
    }

    /// Builder-style method to set the SRID.
    pub fn with_srid(mut self, srid: u32) -> Self {
        self.srid = Some(srid);
        self
    }

    /// Axis-aligned square centred on a point, closed.
    pub fn square(center: Coord, half_side: f64) -> Self {
        let (x, y, d) = (center.x, center.y, half_side);
        Self::new([
            (x - d, y - d),
            (x - d, y + d),
            (x + d, y + d),
            (x + d, y - d),
            (x - d, y - d),
        ])
    }

    /// Bounding box as `(min, max)`, `None` for an empty polygon.
    pub fn bounds(&self) -> Option<(Coord, Coord)> {
        let mut coords = self.rings.iter().flatten();
        let first = *coords.next()?;
        Some(coords.fold((first, first), |(min, max), c| {
            (
                Coord {
                    x: min.x.min(c.x),
                    y: min.y.min(c.y),
                },
                Coord {
                    x: max.x.max(c.x),
                    y: max.y.max(c.y),
                },
            )
        }))
    }
}

impl Shape {
    /// The kind name of this value (`point`, `linestring`, `polygon`).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Shape::Point(_) => Point::type_name(),
            Shape::LineString(_) => LineString::type_name(),
            Shape::Polygon(_) => Polygon::type_name(),
        }
    }

    /// The SRID of this value, if set.
    pub fn srid(&self) -> Option<u32> {
        match self {
            Shape::Point(p) => p.srid,
            Shape::LineString(l) => l.srid,
            Shape::Polygon(p) => p.srid,
        }
    }
}

impl From<Point> for Shape {
    fn from(p: Point) -> Self {
        Shape::Point(p)
    }
}

impl From<LineString> for Shape {
    fn from(l: LineString) -> Self {
        Shape::LineString(l)
    }
}

impl From<Polygon> for Shape {
    fn from(p: Polygon) -> Self {
        Shape::Polygon(p)
    }
}

impl Geometry for Shape {
    fn type_name() -> &'static str {
        "geometry"
    }

    fn to_wkb(&self) -> Vec<u8> {
        match self {
            Shape::Point(p) => p.to_wkb(),
            Shape::LineString(l) => l.to_wkb(),
            Shape::Polygon(p) => p.to_wkb(),
        }
    }

    fn from_wkb(bytes: &[u8]) -> Result<Self> {
        decode_shape(bytes)
    }
}

impl Geometry for Point {
    fn type_name() -> &'static str {
        "point"
    }

    fn to_wkb(&self) -> Vec<u8> {
        let mut w = WkbWriter::header(WKB_POINT, self.srid);
        w.put_coord(self.coord);
        w.finish()
    }

    fn from_wkb(bytes: &[u8]) -> Result<Self> {
        match decode_shape(bytes)? {
            Shape::Point(p) => Ok(p),
            other => Err(kind_mismatch(Self::type_name(), &other)),
        }
    }
}

impl Geometry for LineString {
    fn type_name() -> &'static str {
        "linestring"
    }

    fn to_wkb(&self) -> Vec<u8> {
        let mut w = WkbWriter::header(WKB_LINESTRING, self.srid);
        w.put_coords(&self.coords);
        w.finish()
    }

    fn from_wkb(bytes: &[u8]) -> Result<Self> {
        match decode_shape(bytes)? {
            Shape::LineString(l) => Ok(l),
            other => Err(kind_mismatch(Self::type_name(), &other)),
        }
    }
}

impl Geometry for Polygon {
    fn type_name() -> &'static str {
        "polygon"
    }

    fn to_wkb(&self) -> Vec<u8> {
        let mut w = WkbWriter::header(WKB_POLYGON, self.srid);
        w.put_u32(self.rings.len() as u32);
        for ring in &self.rings {
            w.put_coords(ring);
        }
        w.finish()
    }

    fn from_wkb(bytes: &[u8]) -> Result<Self> {
        match decode_shape(bytes)? {
            Shape::Polygon(p) => Ok(p),
            other => Err(kind_mismatch(Self::type_name(), &other)),
        }
    }
}

fn kind_mismatch(expected: &str, got: &Shape) -> Error {
    Error::InvalidGeometry(format!("expected {expected}, got {}", got.kind_name()))
}

fn decode_shape(bytes: &[u8]) -> Result<Shape> {
    let mut r = WkbReader::new(bytes)?;
    let (kind, srid) = r.header()?;
    let shape = match kind {
        WKB_POINT => Shape::Point(Point {
            coord: r.coord()?,
            srid,
        }),
        WKB_LINESTRING => Shape::LineString(LineString {
            coords: r.coords()?,
            srid,
        }),
        WKB_POLYGON => {
            let count = r.u32()? as usize;
            let mut rings = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                rings.push(r.coords()?);
            }
            Shape::Polygon(Polygon { rings, srid })
        }
        other => {
            return Err(Error::InvalidGeometry(format!(
                "unsupported WKB type code {other}"
            )))
        }
    };
    r.finish()?;
    Ok(shape)
}

struct WkbWriter {
    buf: Vec<u8>,
}

impl WkbWriter {
    fn header(kind: u32, srid: Option<u32>) -> Self {
        let mut w = Self { buf: Vec::new() };
        w.buf.push(1); // little endian
        match srid {
            Some(srid) => {
                w.put_u32(kind | EWKB_SRID_FLAG);
                w.put_u32(srid);
            }
            None => w.put_u32(kind),
        }
        w
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_coord(&mut self, c: Coord) {
        self.buf.extend_from_slice(&c.x.to_le_bytes());
        self.buf.extend_from_slice(&c.y.to_le_bytes());
    }

    fn put_coords(&mut self, coords: &[Coord]) {
        self.put_u32(coords.len() as u32);
        for c in coords {
            self.put_coord(*c);
        }
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct WkbReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> WkbReader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self> {
        let little_endian = match bytes.first() {
            Some(1) => true,
            Some(0) => false,
            Some(b) => {
                return Err(Error::InvalidGeometry(format!("invalid byte order marker {b}")))
            }
            None => return Err(Error::InvalidGeometry("empty WKB".into())),
        };
        Ok(Self {
            bytes,
            pos: 1,
            little_endian,
        })
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| Error::InvalidGeometry("truncated WKB".into()))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let raw = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }

    fn header(&mut self) -> Result<(u32, Option<u32>)> {
        let code = self.u32()?;
        if code & EWKB_ZM_FLAGS != 0 {
            return Err(Error::InvalidGeometry(
                "Z and M geometries are not supported".into(),
            ));
        }
        let srid = if code & EWKB_SRID_FLAG != 0 {
            Some(self.u32()?)
        } else {
            None
        };
        Ok((code & !EWKB_SRID_FLAG, srid))
    }

    fn coord(&mut self) -> Result<Coord> {
        Ok(Coord {
            x: self.f64()?,
            y: self.f64()?,
        })
    }

    fn coords(&mut self) -> Result<Vec<Coord>> {
        let count = self.u32()? as usize;
        // Guard the allocation against corrupt counts.
        let remaining = (self.bytes.len() - self.pos) / 16;
        if count > remaining {
            return Err(Error::InvalidGeometry("truncated WKB".into()));
        }
        (0..count).map(|_| self.coord()).collect()
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(Error::InvalidGeometry(format!(
                "{} trailing bytes after geometry",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}
