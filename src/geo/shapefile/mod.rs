//! Zipped ESRI shapefile reader.

pub mod dbf;
pub mod shp;

use crate::geo::crs::Crs;
use crate::utils::error::{AppError, Result};
use dbf::{parse_dbf, TextEncoding};
use geo::Geometry;
use serde_json::{Map, Value};
use shp::parse_shp;
use std::io::{Cursor, Read};
use zip::ZipArchive;

#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Shapefile {
    pub features: Vec<Feature>,
    /// Attribute columns in `.dbf` order.
    pub columns: Vec<String>,
    pub crs: Crs,
    /// False when the CRS was assumed rather than read from a `.prj`.
    pub crs_detected: bool,
}

struct Members {
    shp: String,
    dbf: Option<String>,
    prj: Option<String>,
    cpg: Option<String>,
}

fn split_extension(name: &str) -> Option<(&str, String)> {
    let (stem, ext) = name.rsplit_once('.')?;
    Some((stem, ext.to_ascii_lowercase()))
}

fn find_members(names: &[String]) -> Result<Members> {
    let shp = names
        .iter()
        .filter(|n| !n.starts_with("__MACOSX/"))
        .find(|n| matches!(split_extension(n), Some((_, ext)) if ext == "shp"))
        .cloned()
        .ok_or_else(|| AppError::unprocessable("No .shp file found in the zip archive"))?;

    let stem = split_extension(&shp).map(|(s, _)| s.to_string()).unwrap_or_default();
    let sibling = |wanted: &str| {
        names
            .iter()
            .find(|n| matches!(split_extension(n), Some((s, ext)) if s == stem && ext == wanted))
            .cloned()
    };

    Ok(Members {
        dbf: sibling("dbf"),
        prj: sibling("prj"),
        cpg: sibling("cpg"),
        shp,
    })
}

/// Largest uncompressed archive member that will be read.
pub const MAX_MEMBER_BYTES: u64 = 512 * 1024 * 1024;

fn read_member<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    read_member_limited(archive, name, MAX_MEMBER_BYTES)
}

/// Reads at most `limit` bytes. The size declared in the zip header is not
/// trusted.
fn read_member_limited<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>> {
    let file = archive.by_name(name)?;
    let mut buf = Vec::new();
    file.take(limit + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(AppError::unprocessable(format!(
            "{name} is larger than {limit} bytes when uncompressed"
        )));
    }
    Ok(buf)
}

/// Reads the first shapefile found in a zip archive together with its
/// `.dbf`, `.prj` and `.cpg` siblings.
pub fn read_zip(bytes: &[u8]) -> Result<Shapefile> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AppError::unprocessable(format!("Invalid zip archive: {e}")))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let members = find_members(&names)?;
    tracing::debug!("Reading shapefile {} from archive", members.shp);

    let shp = parse_shp(&read_member(&mut archive, &members.shp)?)?;

    let encoding = match &members.cpg {
        Some(name) => {
            let raw = read_member(&mut archive, name)?;
            TextEncoding::from_cpg(&String::from_utf8_lossy(&raw))
        }
        None => TextEncoding::Detect,
    };

    let (columns, mut attributes) = match &members.dbf {
        Some(name) => {
            let table = parse_dbf(&read_member(&mut archive, name)?, encoding)?;
            (table.column_names(), table.records)
        }
        None => {
            tracing::warn!("⚠️ No .dbf in archive, features will have no attributes");
            (Vec::new(), Vec::new())
        }
    };

    let detected = match &members.prj {
        Some(name) => {
            let raw = read_member(&mut archive, name)?;
            let wkt = String::from_utf8_lossy(&raw);
            let crs = Crs::from_wkt(&wkt);
            if crs.is_none() {
                tracing::warn!("⚠️ Unrecognised projection in {}: {}", name, wkt.trim());
            }
            crs
        }
        None => None,
    };
    let crs = detected.unwrap_or(Crs::Tm35Fin);
    if detected.is_none() {
        tracing::warn!("⚠️ Assuming {} for {}", crs, members.shp);
    }

    if !attributes.is_empty() && attributes.len() != shp.records.len() {
        tracing::warn!(
            "⚠️ Shape and attribute counts differ ({} vs {}), pairing by index",
            shp.records.len(),
            attributes.len()
        );
    }
    attributes.resize(shp.records.len().max(attributes.len()), Some(Map::new()));

    let features = shp
        .records
        .into_iter()
        .zip(attributes)
        .filter_map(|(geometry, properties)| {
            properties.map(|properties| Feature { geometry, properties })
        })
        .collect();

    Ok(Shapefile {
        features,
        columns,
        crs,
        crs_detected: detected.is_some(),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::dbf::writer::dbf_file;
    use super::shp::writer::{polygon_file, square};
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub const TM35FIN_PRJ: &str = r#"PROJCS["ETRS89_TM35FIN",GEOGCS["GCS_ETRS_1989",DATUM["D_ETRS_1989",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",27.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#;

    pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Three squares near Hämeenlinna in EPSG:3067. The first two share a
    /// name and municipality.
    pub fn forest_zip() -> Vec<u8> {
        let shp = polygon_file(&[
            vec![square(350_000.0, 6_760_000.0, 100.0)],
            vec![square(350_500.0, 6_760_000.0, 100.0)],
            vec![square(351_000.0, 6_760_000.0, 200.0)],
        ]);
        let dbf = dbf_file(
            &[
                ("nimi", 'C', 30, 0),
                ("kunta", 'C', 20, 0),
                ("maakunta", 'C', 20, 0),
                ("ala_ha", 'N', 10, 2),
                ("omistaja", 'C', 20, 0),
            ],
            &[
                vec![
                    b"Kuusikko".to_vec(),
                    b"H\xe4meenlinna".to_vec(),
                    b"Kanta-H\xe4me".to_vec(),
                    b"1.00".to_vec(),
                    b"Metsahallitus".to_vec(),
                ],
                vec![
                    b" kuusikko ".to_vec(),
                    b"H\xc4MEENLINNA".to_vec(),
                    b"Kanta-H\xe4me".to_vec(),
                    b"1.00".to_vec(),
                    b"Yksityinen".to_vec(),
                ],
                vec![
                    b"Lehto".to_vec(),
                    b"Hattula".to_vec(),
                    b"".to_vec(),
                    b"4.00".to_vec(),
                    b"".to_vec(),
                ],
            ],
            &[],
        );
        zip_archive(&[
            ("data/alueet.shp", &shp),
            ("data/alueet.dbf", &dbf),
            ("data/alueet.prj", TM35FIN_PRJ.as_bytes()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{forest_zip, zip_archive};
    use super::shp::writer::{polygon_file, square};
    use super::*;

    #[test]
    fn test_read_zip() {
        let shapefile = read_zip(&forest_zip()).unwrap();
        assert_eq!(shapefile.crs, Crs::Tm35Fin);
        assert!(shapefile.crs_detected);
        assert_eq!(
            shapefile.columns,
            vec!["nimi", "kunta", "maakunta", "ala_ha", "omistaja"]
        );
        assert_eq!(shapefile.features.len(), 3);

        let first = &shapefile.features[0];
        assert!(matches!(first.geometry, Some(Geometry::Polygon(_))));
        assert_eq!(first.properties["kunta"], "Hämeenlinna");
        assert_eq!(first.properties["ala_ha"].as_f64(), Some(1.0));
        assert_eq!(shapefile.features[2].properties["maakunta"], Value::Null);
    }

    #[test]
    fn test_missing_prj_assumes_tm35fin() {
        let shp = polygon_file(&[vec![square(0.0, 0.0, 1.0)]]);
        let bytes = zip_archive(&[("a.SHP", &shp)]);
        let shapefile = read_zip(&bytes).unwrap();
        assert_eq!(shapefile.crs, Crs::Tm35Fin);
        assert!(!shapefile.crs_detected);
        // no .dbf: attributes are empty
        assert!(shapefile.columns.is_empty());
        assert!(shapefile.features[0].properties.is_empty());
    }

    #[test]
    fn test_siblings_matched_case_insensitively() {
        let shp = polygon_file(&[vec![square(0.0, 0.0, 1.0)]]);
        let prj = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        let bytes = zip_archive(&[("Layer.shp", &shp), ("Layer.PRJ", prj.as_bytes())]);
        let shapefile = read_zip(&bytes).unwrap();
        assert_eq!(shapefile.crs, Crs::Wgs84);
    }

    #[test]
    fn test_archive_without_shp() {
        let bytes = zip_archive(&[("readme.txt", b"nothing here")]);
        let err = read_zip(&bytes).unwrap_err();
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn test_oversized_member_is_rejected() {
        let zeros = vec![0u8; 64 * 1024];
        let bytes = zip_archive(&[("alueet.shp", &zeros)]);
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();

        let err = read_member_limited(&mut archive, "alueet.shp", 1024).unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(err.to_string().contains("larger than 1024 bytes"));

        let read = read_member_limited(&mut archive, "alueet.shp", zeros.len() as u64).unwrap();
        assert_eq!(read.len(), zeros.len());
    }

    #[test]
    fn test_not_a_zip() {
        let err = read_zip(b"definitely not a zip").unwrap_err();
        assert_eq!(err.status_code(), 422);
    }
}
