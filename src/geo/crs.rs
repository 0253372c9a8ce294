//! Coordinate reference systems the service deals with and the math to move
//! between them. Geographic coordinates are `x = longitude`, `y = latitude`
//! in degrees.
//!
//! ETRS89 and WGS84 are treated as the same datum; the difference is well
//! below what forest area mapping cares about.

use geo::{Coord, Geometry, MapCoords};
use serde::{Deserialize, Serialize};
use std::fmt;

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Points sampled along each bbox edge when reprojecting a bbox.
const BBOX_EDGE_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// EPSG:4326 (also accepts EPSG:4258 ETRS89 geographic)
    Wgs84,
    /// EPSG:3067 ETRS89 / TM35FIN(E,N), identical to UTM zone 35N
    Tm35Fin,
    /// EPSG:3857, GeoWebCache calls the same grid EPSG:900913
    WebMercator,
}

impl Crs {
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Tm35Fin => 3067,
            Crs::WebMercator => 3857,
        }
    }

    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 | 4258 => Some(Crs::Wgs84),
            3067 | 25835 | 32635 => Some(Crs::Tm35Fin),
            3857 | 900913 | 3785 | 102100 => Some(Crs::WebMercator),
            _ => None,
        }
    }

    /// Detects the CRS of an ESRI `.prj` / OGC WKT string. The outermost
    /// `AUTHORITY["EPSG", n]` wins; without one the CRS name is matched.
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        let trimmed = wkt.trim();

        if let Some(code) = outer_authority_code(trimmed) {
            if let Some(crs) = Crs::from_epsg(code) {
                return Some(crs);
            }
        }

        let normalized = trimmed.to_ascii_uppercase().replace([' ', '-'], "_");
        let head = normalized.split('[').next().unwrap_or("");

        if head.starts_with("PROJCS") || head.starts_with("PROJCRS") {
            let is_tm35 = normalized.contains("TM35FIN")
                || normalized.contains("UTM_ZONE_35N")
                || normalized.contains("UTM_35N");
            if is_tm35 {
                return Some(Crs::Tm35Fin);
            }
            let is_web_mercator = normalized.contains("PSEUDO_MERCATOR")
                || normalized.contains("WEB_MERCATOR")
                || normalized.contains("MERCATOR_AUXILIARY_SPHERE")
                || normalized.contains("POPULAR_VISUALISATION");
            if is_web_mercator {
                return Some(Crs::WebMercator);
            }
            return None;
        }

        if head.starts_with("GEOGCS") || head.starts_with("GEOGCRS") {
            let known_datum = normalized.contains("WGS_1984")
                || normalized.contains("WGS_84")
                || normalized.contains("WGS84")
                || normalized.contains("ETRS_1989")
                || normalized.contains("ETRS89");
            if known_datum {
                return Some(Crs::Wgs84);
            }
        }

        None
    }

    pub fn to_geographic(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => coord,
            Crs::Tm35Fin => TransverseMercator::TM35FIN.inverse(coord),
            Crs::WebMercator => web_mercator_inverse(coord),
        }
    }

    pub fn from_geographic(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => coord,
            Crs::Tm35Fin => TransverseMercator::TM35FIN.forward(coord),
            Crs::WebMercator => web_mercator_forward(coord),
        }
    }

    pub fn transform(&self, coord: Coord<f64>, to: Crs) -> Coord<f64> {
        if *self == to {
            return coord;
        }
        to.from_geographic(self.to_geographic(coord))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

fn outer_authority_code(wkt: &str) -> Option<u32> {
    // The CRS's own AUTHORITY sits at bracket depth 1; nested ones describe
    // datums, units and so on.
    let upper = wkt.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut depth = 0usize;
    let mut found = None;

    for (idx, &b) in bytes.iter().enumerate() {
        match b {
            b'[' | b'(' => depth += 1,
            b']' | b')' => depth = depth.saturating_sub(1),
            b'A' if depth == 1 && upper[idx..].starts_with("AUTHORITY[") => {
                found = parse_authority(&upper[idx + "AUTHORITY[".len()..]);
            }
            b'I' if depth == 1 && upper[idx..].starts_with("ID[") => {
                found = parse_authority(&upper[idx + "ID[".len()..]);
            }
            _ => {}
        }
    }

    found
}

fn parse_authority(rest: &str) -> Option<u32> {
    let end = rest.find(']')?;
    let mut parts = rest[..end].split(',');
    let authority = parts.next()?.trim().trim_matches('"');
    if authority != "EPSG" {
        return None;
    }
    parts.next()?.trim().trim_matches('"').parse().ok()
}

/// Transverse Mercator with the Krüger series (JHS 154), accurate to well
/// under a millimetre inside the zone.
#[derive(Debug, Clone, Copy)]
struct TransverseMercator {
    semi_major: f64,
    flattening: f64,
    scale: f64,
    central_meridian: f64,
    false_easting: f64,
    false_northing: f64,
}

impl TransverseMercator {
    const TM35FIN: TransverseMercator = TransverseMercator {
        semi_major: 6_378_137.0,
        flattening: 1.0 / 298.257_222_101,
        scale: 0.9996,
        central_meridian: 27.0,
        false_easting: 500_000.0,
        false_northing: 0.0,
    };

    fn n(&self) -> f64 {
        self.flattening / (2.0 - self.flattening)
    }

    fn eccentricity(&self) -> f64 {
        (2.0 * self.flattening - self.flattening * self.flattening).sqrt()
    }

    fn rectifying_radius(&self) -> f64 {
        let n = self.n();
        let n2 = n * n;
        self.semi_major / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0)
    }

    fn forward(&self, coord: Coord<f64>) -> Coord<f64> {
        let n = self.n();
        let (n2, n3, n4) = (n * n, n * n * n, n * n * n * n);
        let h = [
            n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3 + 41.0 / 180.0 * n4,
            13.0 / 48.0 * n2 - 3.0 / 5.0 * n3 + 557.0 / 1440.0 * n4,
            61.0 / 240.0 * n3 - 103.0 / 140.0 * n4,
            49561.0 / 161280.0 * n4,
        ];
        let e = self.eccentricity();

        let phi = coord.y.to_radians();
        let dlambda = (coord.x - self.central_meridian).to_radians();

        let q = phi.tan().asinh() - e * (e * phi.sin()).atanh();
        let beta = q.sinh().atan();
        let eta_prime = (beta.cos() * dlambda.sin()).atanh();
        let xi_prime = (beta.sin() * eta_prime.cosh()).asin();

        let mut xi = xi_prime;
        let mut eta = eta_prime;
        for (i, hi) in h.iter().enumerate() {
            let k = 2.0 * (i as f64 + 1.0);
            xi += hi * (k * xi_prime).sin() * (k * eta_prime).cosh();
            eta += hi * (k * xi_prime).cos() * (k * eta_prime).sinh();
        }

        let a1 = self.rectifying_radius();
        Coord {
            x: a1 * eta * self.scale + self.false_easting,
            y: a1 * xi * self.scale + self.false_northing,
        }
    }

    fn inverse(&self, coord: Coord<f64>) -> Coord<f64> {
        let n = self.n();
        let (n2, n3, n4) = (n * n, n * n * n, n * n * n * n);
        let h = [
            n / 2.0 - 2.0 / 3.0 * n2 + 37.0 / 96.0 * n3 - 1.0 / 360.0 * n4,
            1.0 / 48.0 * n2 + 1.0 / 15.0 * n3 - 437.0 / 1440.0 * n4,
            17.0 / 480.0 * n3 - 37.0 / 840.0 * n4,
            4397.0 / 161280.0 * n4,
        ];
        let e = self.eccentricity();
        let a1 = self.rectifying_radius();

        let xi = (coord.y - self.false_northing) / (a1 * self.scale);
        let eta = (coord.x - self.false_easting) / (a1 * self.scale);

        let mut xi_prime = xi;
        let mut eta_prime = eta;
        for (i, hi) in h.iter().enumerate() {
            let k = 2.0 * (i as f64 + 1.0);
            xi_prime -= hi * (k * xi).sin() * (k * eta).cosh();
            eta_prime -= hi * (k * xi).cos() * (k * eta).sinh();
        }

        let beta = (xi_prime.sin() / eta_prime.cosh()).asin();
        let dlambda = (eta_prime.tanh() / beta.cos()).asin();
        let q = beta.tan().asinh();

        let mut q_prime = q;
        for _ in 0..20 {
            let next = q + e * (e * q_prime.tanh()).atanh();
            let converged = (next - q_prime).abs() < 1e-14;
            q_prime = next;
            if converged {
                break;
            }
        }

        Coord {
            x: self.central_meridian + dlambda.to_degrees(),
            y: q_prime.sinh().atan().to_degrees(),
        }
    }
}

fn web_mercator_forward(coord: Coord<f64>) -> Coord<f64> {
    // Latitude is clamped to the square Web Mercator world.
    let lat = coord.y.clamp(-85.051_128_779_806_59, 85.051_128_779_806_59);
    Coord {
        x: WEB_MERCATOR_RADIUS * coord.x.to_radians(),
        y: WEB_MERCATOR_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

fn web_mercator_inverse(coord: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (coord.x / WEB_MERCATOR_RADIUS).to_degrees(),
        y: (2.0 * (coord.y / WEB_MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
            .to_degrees(),
    }
}

pub fn reproject_geometry(geometry: &Geometry<f64>, from: Crs, to: Crs) -> Geometry<f64> {
    if from == to {
        return geometry.clone();
    }
    geometry.map_coords(|coord| from.transform(coord, to))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    pub fn from_coords<I: IntoIterator<Item = Coord<f64>>>(coords: I) -> Option<Self> {
        coords.into_iter().fold(None, |acc: Option<BBox>, c| {
            Some(match acc {
                None => BBox::new(c.x, c.y, c.x, c.y),
                Some(b) => BBox {
                    min_x: b.min_x.min(c.x),
                    min_y: b.min_y.min(c.y),
                    max_x: b.max_x.max(c.x),
                    max_y: b.max_y.max(c.y),
                },
            })
        })
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Grows the box by `margin` units on every side.
    pub fn buffered(&self, margin: f64) -> BBox {
        BBox {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

/// Reprojects a bbox. Edges are sampled because a straight edge in one CRS is
/// generally curved in another.
pub fn reproject_bbox(bbox: &BBox, from: Crs, to: Crs) -> BBox {
    if from == to {
        return *bbox;
    }

    let steps = BBOX_EDGE_SAMPLES;
    let mut samples = Vec::with_capacity(4 * (steps + 1));
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = bbox.min_x + (bbox.max_x - bbox.min_x) * t;
        let y = bbox.min_y + (bbox.max_y - bbox.min_y) * t;
        samples.push(Coord { x, y: bbox.min_y });
        samples.push(Coord { x, y: bbox.max_y });
        samples.push(Coord { x: bbox.min_x, y });
        samples.push(Coord { x: bbox.max_x, y });
    }

    BBox::from_coords(samples.into_iter().map(|c| from.transform(c, to))).unwrap_or(*bbox)
}
