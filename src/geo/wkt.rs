use geo::{Coord, Geometry, LineString, Polygon};

/// Writes a geometry as OGC WKT for `ST_GeomFromText`.
pub fn to_wkt(geometry: &Geometry<f64>) -> String {
    match geometry {
        Geometry::Point(p) => format!("POINT({})", coord(p.0)),
        Geometry::Line(l) => format!("LINESTRING({}, {})", coord(l.start), coord(l.end)),
        Geometry::LineString(ls) => tagged("LINESTRING", line_body(ls)),
        Geometry::Polygon(p) => tagged("POLYGON", polygon_body(p)),
        Geometry::MultiPoint(mp) => {
            if mp.0.is_empty() {
                "MULTIPOINT EMPTY".to_string()
            } else {
                let points: Vec<String> = mp.0.iter().map(|p| format!("({})", coord(p.0))).collect();
                format!("MULTIPOINT({})", points.join(", "))
            }
        }
        Geometry::MultiLineString(mls) => {
            if mls.0.is_empty() {
                "MULTILINESTRING EMPTY".to_string()
            } else {
                let lines: Vec<String> = mls.0.iter().map(line_body).collect();
                format!("MULTILINESTRING({})", lines.join(", "))
            }
        }
        Geometry::MultiPolygon(mp) => {
            if mp.0.is_empty() {
                "MULTIPOLYGON EMPTY".to_string()
            } else {
                let polygons: Vec<String> = mp.0.iter().map(polygon_body).collect();
                format!("MULTIPOLYGON({})", polygons.join(", "))
            }
        }
        Geometry::GeometryCollection(gc) => {
            if gc.0.is_empty() {
                "GEOMETRYCOLLECTION EMPTY".to_string()
            } else {
                let members: Vec<String> = gc.0.iter().map(to_wkt).collect();
                format!("GEOMETRYCOLLECTION({})", members.join(", "))
            }
        }
        Geometry::Rect(r) => tagged("POLYGON", polygon_body(&r.to_polygon())),
        Geometry::Triangle(t) => tagged("POLYGON", polygon_body(&t.to_polygon())),
    }
}

fn tagged(tag: &str, body: String) -> String {
    if body.is_empty() {
        format!("{tag} EMPTY")
    } else {
        format!("{tag}{body}")
    }
}

fn coord(c: Coord<f64>) -> String {
    format!("{} {}", c.x, c.y)
}

fn line_body(ls: &LineString<f64>) -> String {
    if ls.0.is_empty() {
        return String::new();
    }
    let coords: Vec<String> = ls.0.iter().map(|c| coord(*c)).collect();
    format!("({})", coords.join(", "))
}

fn polygon_body(p: &Polygon<f64>) -> String {
    if p.exterior().0.is_empty() {
        return String::new();
    }
    let rings: Vec<String> = std::iter::once(p.exterior())
        .chain(p.interiors().iter())
        .map(line_body)
        .collect();
    format!("({})", rings.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon, MultiPolygon};

    #[test]
    fn test_point_and_line() {
        assert_eq!(to_wkt(&point!(x: 1.5, y: 2.0).into()), "POINT(1.5 2)");
        let ls = line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.5)];
        assert_eq!(to_wkt(&ls.into()), "LINESTRING(0 0, 10 0.5)");
    }

    #[test]
    fn test_polygon_with_hole() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 1.0)]],
        );
        assert_eq!(
            to_wkt(&poly.into()),
            "POLYGON((0 0, 10 0, 10 10, 0 0), (1 1, 2 1, 2 2, 1 1))"
        );
    }

    #[test]
    fn test_multipolygon_and_empty() {
        let a = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let b = polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0)];
        let wkt = to_wkt(&MultiPolygon::new(vec![a, b]).into());
        assert_eq!(
            wkt,
            "MULTIPOLYGON(((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))"
        );
        assert_eq!(
            to_wkt(&MultiPolygon::<f64>::new(vec![]).into()),
            "MULTIPOLYGON EMPTY"
        );
    }
}
