//! Builders for zipped shapefiles used by the integration tests.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const TM35FIN_PRJ: &str = r#"PROJCS["ETRS89_TM35FIN",GEOGCS["GCS_ETRS_1989",DATUM["D_ETRS_1989",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",27.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#;

pub const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

/// Clockwise square as `(x, y)` pairs.
pub fn square(x: f64, y: f64, size: f64) -> Vec<(f64, f64)> {
    vec![
        (x, y),
        (x, y + size),
        (x + size, y + size),
        (x + size, y),
        (x, y),
    ]
}

/// `.shp` with one single-ring polygon record per entry.
pub fn polygon_shp(rings: &[Vec<(f64, f64)>]) -> Vec<u8> {
    let mut records = Vec::new();
    for (idx, ring) in rings.iter().enumerate() {
        let mut content = Vec::new();
        content.extend_from_slice(&5i32.to_le_bytes());
        content.extend_from_slice(&[0u8; 32]);
        content.extend_from_slice(&1i32.to_le_bytes());
        content.extend_from_slice(&(ring.len() as i32).to_le_bytes());
        content.extend_from_slice(&0i32.to_le_bytes());
        for (x, y) in ring {
            content.extend_from_slice(&x.to_le_bytes());
            content.extend_from_slice(&y.to_le_bytes());
        }
        records.extend_from_slice(&(idx as i32 + 1).to_be_bytes());
        records.extend_from_slice(&((content.len() / 2) as i32).to_be_bytes());
        records.extend_from_slice(&content);
    }

    let mut file = Vec::new();
    file.extend_from_slice(&9994i32.to_be_bytes());
    file.extend_from_slice(&[0u8; 20]);
    file.extend_from_slice(&(((100 + records.len()) / 2) as i32).to_be_bytes());
    file.extend_from_slice(&1000i32.to_le_bytes());
    file.extend_from_slice(&5i32.to_le_bytes());
    file.extend_from_slice(&[0u8; 64]);
    file.extend_from_slice(&records);
    file
}

/// `.dbf` with character columns only.
pub fn text_dbf(columns: &[&str], rows: &[Vec<&str>]) -> Vec<u8> {
    const WIDTH: usize = 40;
    let record_len = 1 + columns.len() * WIDTH;
    let header_len = 32 + columns.len() * 32 + 1;

    let mut out = vec![0x03, 124, 1, 1];
    out.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(&(record_len as u16).to_le_bytes());
    out.extend_from_slice(&[0u8; 20]);
    for name in columns {
        let mut descriptor = [0u8; 32];
        descriptor[..name.len()].copy_from_slice(name.as_bytes());
        descriptor[11] = b'C';
        descriptor[16] = WIDTH as u8;
        out.extend_from_slice(&descriptor);
    }
    out.push(0x0D);
    for row in rows {
        out.push(b' ');
        for value in row {
            let mut cell = value.as_bytes().to_vec();
            cell.resize(WIDTH, b' ');
            out.extend_from_slice(&cell);
        }
    }
    out.push(0x1A);
    out
}

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

/// Shapefile archive with `nimi`, `kunta` and `tunnus` columns.
pub fn areas_zip(prj: &str, rings: &[Vec<(f64, f64)>], rows: &[Vec<&str>]) -> Vec<u8> {
    let shp = polygon_shp(rings);
    let dbf = text_dbf(&["nimi", "kunta", "tunnus"], rows);
    zip_archive(&[
        ("alueet.shp", &shp),
        ("alueet.dbf", &dbf),
        ("alueet.prj", prj.as_bytes()),
    ])
}
