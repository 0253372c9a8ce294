//! `.shp` main file decoding. The file header and record headers are
//! big-endian, everything inside a record is little-endian.

use crate::utils::error::{AppError, Result};
use geo::{
    Contains, Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point,
    Polygon,
};

const FILE_CODE: i32 = 9994;
const HEADER_LEN: usize = 100;
const RECORD_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    MultiPatch,
}

impl ShapeType {
    /// Z and M variants collapse onto their 2D type; the extra ordinates are dropped.
    fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(ShapeType::Null),
            1 | 11 | 21 => Ok(ShapeType::Point),
            3 | 13 | 23 => Ok(ShapeType::PolyLine),
            5 | 15 | 25 => Ok(ShapeType::Polygon),
            8 | 18 | 28 => Ok(ShapeType::MultiPoint),
            31 => Ok(ShapeType::MultiPatch),
            other => Err(AppError::shapefile(format!("Unknown shape type {}", other))),
        }
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| {
                AppError::shapefile(format!(
                    "Unexpected end of data reading {} bytes at offset {}",
                    len, offset
                ))
            })
    }

    fn i32_be(&self, offset: usize) -> Result<i32> {
        let b = self.slice(offset, 4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32_le(&self, offset: usize) -> Result<i32> {
        let b = self.slice(offset, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64_le(&self, offset: usize) -> Result<f64> {
        let b = self.slice(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(f64::from_le_bytes(buf))
    }

    fn count(&self, offset: usize, what: &str) -> Result<usize> {
        let value = self.i32_le(offset)?;
        usize::try_from(value)
            .map_err(|_| AppError::shapefile(format!("Negative {} count {}", what, value)))
    }

    fn coord(&self, offset: usize) -> Result<Coord<f64>> {
        Ok(Coord {
            x: self.f64_le(offset)?,
            y: self.f64_le(offset + 8)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ShpFile {
    pub shape_type: ShapeType,
    pub records: Vec<Option<Geometry<f64>>>,
}

pub fn parse_shp(bytes: &[u8]) -> Result<ShpFile> {
    let reader = ByteReader::new(bytes);
    if bytes.len() < HEADER_LEN {
        return Err(AppError::shapefile("The .shp file is shorter than its header"));
    }

    let file_code = reader.i32_be(0)?;
    if file_code != FILE_CODE {
        return Err(AppError::shapefile(format!(
            "Not a shapefile (file code {})",
            file_code
        )));
    }

    let version = reader.i32_le(28)?;
    if version != 1000 {
        tracing::warn!("Unexpected shapefile version {}, reading anyway", version);
    }
    let shape_type = ShapeType::from_code(reader.i32_le(32)?)?;
    if shape_type == ShapeType::MultiPatch {
        return Err(AppError::shapefile("MultiPatch shapefiles are not supported"));
    }

    let mut records = Vec::new();
    let mut offset = HEADER_LEN;
    while offset + RECORD_HEADER_LEN <= bytes.len() {
        let content_words = reader.i32_be(offset + 4)?;
        let content_len = usize::try_from(content_words)
            .map_err(|_| AppError::shapefile("Negative record length"))?
            * 2;
        let content = reader.slice(offset + RECORD_HEADER_LEN, content_len)?;
        records.push(parse_record(content)?);
        offset += RECORD_HEADER_LEN + content_len;
    }

    Ok(ShpFile {
        shape_type,
        records,
    })
}

fn parse_record(content: &[u8]) -> Result<Option<Geometry<f64>>> {
    let reader = ByteReader::new(content);
    let shape_type = ShapeType::from_code(reader.i32_le(0)?)?;

    match shape_type {
        ShapeType::Null => Ok(None),
        ShapeType::Point => {
            let c = reader.coord(4)?;
            Ok(Some(Geometry::Point(Point(c))))
        }
        ShapeType::MultiPoint => {
            // skip the bbox (4 doubles)
            let num_points = reader.count(36, "point")?;
            let points = (0..num_points)
                .map(|i| reader.coord(40 + i * 16).map(Point))
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(Geometry::MultiPoint(MultiPoint::new(points))))
        }
        ShapeType::PolyLine | ShapeType::Polygon => {
            let parts = read_parts(&reader)?;
            if parts.is_empty() {
                return Ok(None);
            }
            if shape_type == ShapeType::PolyLine {
                let mut lines: Vec<LineString<f64>> =
                    parts.into_iter().map(LineString::new).collect();
                if lines.len() == 1 {
                    Ok(lines.pop().map(Geometry::LineString))
                } else {
                    Ok(Some(Geometry::MultiLineString(MultiLineString::new(lines))))
                }
            } else {
                Ok(assemble_polygon(parts))
            }
        }
        ShapeType::MultiPatch => Err(AppError::shapefile("MultiPatch records are not supported")),
    }
}

fn read_parts(reader: &ByteReader<'_>) -> Result<Vec<Vec<Coord<f64>>>> {
    let num_parts = reader.count(36, "part")?;
    let num_points = reader.count(40, "point")?;
    let parts_offset = 44;
    let points_offset = parts_offset + num_parts * 4;

    let mut starts = (0..num_parts)
        .map(|i| reader.count(parts_offset + i * 4, "part index"))
        .collect::<Result<Vec<_>>>()?;
    starts.push(num_points);

    let mut parts = Vec::with_capacity(num_parts);
    for window in starts.windows(2) {
        let (start, end) = (window[0], window[1]);
        if start > end || end > num_points {
            return Err(AppError::shapefile(format!(
                "Part range {}..{} outside {} points",
                start, end, num_points
            )));
        }
        let coords = (start..end)
            .map(|i| reader.coord(points_offset + i * 16))
            .collect::<Result<Vec<_>>>()?;
        parts.push(coords);
    }
    Ok(parts)
}

/// Shoelace sum; positive for counter-clockwise rings.
fn signed_area(ring: &[Coord<f64>]) -> f64 {
    ring.windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum::<f64>()
        / 2.0
}

fn close_ring(mut ring: Vec<Coord<f64>>) -> Vec<Coord<f64>> {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
    ring
}

/// Shapefile polygons are a flat list of rings: clockwise rings are shells,
/// counter-clockwise rings are holes of the shell that contains them.
fn assemble_polygon(parts: Vec<Vec<Coord<f64>>>) -> Option<Geometry<f64>> {
    let rings: Vec<Vec<Coord<f64>>> = parts
        .into_iter()
        .map(close_ring)
        .filter(|ring| ring.len() >= 4)
        .collect();

    let (mut shells, mut holes): (Vec<_>, Vec<_>) =
        rings.into_iter().partition(|ring| signed_area(ring) < 0.0);

    // Some writers ignore the winding rule entirely.
    if shells.is_empty() {
        shells = std::mem::take(&mut holes);
    }

    let mut polygons: Vec<Polygon<f64>> = shells
        .into_iter()
        .map(|ring| Polygon::new(LineString::new(ring), vec![]))
        .collect();

    for hole in holes {
        let probe = Point(hole[0]);
        match polygons.iter().position(|p| p.contains(&probe)) {
            Some(idx) => polygons[idx].interiors_push(LineString::new(hole)),
            None => polygons.push(Polygon::new(LineString::new(hole), vec![])),
        }
    }

    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(polygons))),
    }
}
