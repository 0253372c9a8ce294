//! dBASE III attribute table decoding.

use crate::utils::error::{AppError, Result};
use crate::utils::general::{decode_windows_1252, fix_encoding};
use serde_json::{Map, Number, Value};

const FIELD_DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const DELETED_FLAG: u8 = b'*';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Windows1252,
    /// UTF-8 when the bytes are valid UTF-8, Windows-1252 otherwise
    Detect,
}

impl TextEncoding {
    /// Interprets a `.cpg` sidecar file.
    pub fn from_cpg(cpg: &str) -> Self {
        let normalized = cpg.trim().to_ascii_uppercase().replace(['-', '_', ' '], "");
        match normalized.as_str() {
            "UTF8" | "65001" => TextEncoding::Utf8,
            "1252" | "CP1252" | "WINDOWS1252" | "ANSI1252" | "ISO88591" | "LATIN1" | "88591" => {
                TextEncoding::Windows1252
            }
            _ => TextEncoding::Detect,
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Windows1252 => decode_windows_1252(bytes),
            TextEncoding::Detect => match std::str::from_utf8(bytes) {
                Ok(s) => s.to_string(),
                Err(_) => decode_windows_1252(bytes),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: char,
    pub length: usize,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct DbfTable {
    pub fields: Vec<FieldDescriptor>,
    /// `None` marks a record flagged as deleted.
    pub records: Vec<Option<Map<String, Value>>>,
}

impl DbfTable {
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

fn u16_le(bytes: &[u8], offset: usize) -> Result<usize> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
        .ok_or_else(|| AppError::shapefile("The .dbf header is truncated"))
}

fn u32_le(bytes: &[u8], offset: usize) -> Result<usize> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or_else(|| AppError::shapefile("The .dbf header is truncated"))
}

pub fn parse_dbf(bytes: &[u8], encoding: TextEncoding) -> Result<DbfTable> {
    let num_records = u32_le(bytes, 4)?;
    let header_len = u16_le(bytes, 8)?;
    let record_len = u16_le(bytes, 10)?;

    if header_len > bytes.len() || record_len == 0 {
        return Err(AppError::shapefile("The .dbf header is inconsistent"));
    }

    let mut fields = Vec::new();
    let mut offset = 32;
    while offset + FIELD_DESCRIPTOR_LEN <= header_len && bytes[offset] != HEADER_TERMINATOR {
        let descriptor = &bytes[offset..offset + FIELD_DESCRIPTOR_LEN];
        let name_end = descriptor[..11].iter().position(|&b| b == 0).unwrap_or(11);
        fields.push(FieldDescriptor {
            name: encoding.decode(&descriptor[..name_end]).trim().to_string(),
            field_type: descriptor[11] as char,
            length: descriptor[16] as usize,
            decimals: descriptor[17],
        });
        offset += FIELD_DESCRIPTOR_LEN;
    }

    let mut records = Vec::with_capacity(num_records);
    let mut offset = header_len;
    for _ in 0..num_records {
        let Some(record) = bytes.get(offset..offset + record_len) else {
            tracing::warn!(
                "The .dbf ends after {} of {} records",
                records.len(),
                num_records
            );
            break;
        };
        if record[0] == END_OF_FILE {
            break;
        }
        offset += record_len;

        if record[0] == DELETED_FLAG {
            records.push(None);
            continue;
        }

        let mut row = Map::new();
        let mut field_offset = 1;
        for field in &fields {
            let raw = record
                .get(field_offset..field_offset + field.length)
                .unwrap_or(&[]);
            row.insert(field.name.clone(), decode_value(field, raw, encoding));
            field_offset += field.length;
        }
        records.push(Some(row));
    }

    Ok(DbfTable { fields, records })
}

fn decode_value(field: &FieldDescriptor, raw: &[u8], encoding: TextEncoding) -> Value {
    match field.field_type.to_ascii_uppercase() {
        'C' => {
            let text = encoding.decode(raw);
            let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(fix_encoding(text))
            }
        }
        'N' | 'F' => {
            let text = String::from_utf8_lossy(raw);
            parse_number(text.trim(), field.decimals)
        }
        'L' => match raw.first().map(|b| b.to_ascii_uppercase()) {
            Some(b'Y') | Some(b'T') => Value::Bool(true),
            Some(b'N') | Some(b'F') => Value::Bool(false),
            _ => Value::Null,
        },
        'D' => {
            let text = String::from_utf8_lossy(raw);
            let text = text.trim();
            if text.is_empty() || text.chars().all(|c| c == '0') {
                Value::Null
            } else if text.len() == 8 && text.chars().all(|c| c.is_ascii_digit()) {
                Value::String(format!("{}-{}-{}", &text[0..4], &text[4..6], &text[6..8]))
            } else {
                Value::String(text.to_string())
            }
        }
        'I' if raw.len() == 4 => Value::Number(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]).into()),
        // memo blocks live in a .dbt we do not read
        _ => Value::Null,
    }
}

/// Blank, overflowed (`****`) and non-finite numbers become `null`.
fn parse_number(text: &str, decimals: u8) -> Value {
    if text.is_empty() || text.starts_with('*') {
        return Value::Null;
    }
    if decimals == 0 {
        if let Ok(int) = text.parse::<i64>() {
            return Value::Number(int.into());
        }
    }
    text.replace(',', ".")
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
pub(crate) mod writer {
    //! Minimal `.dbf` writer used to build fixtures. Fields are `(name, type, length, decimals)`.

    pub fn dbf_file(
        fields: &[(&str, char, u8, u8)],
        rows: &[Vec<Vec<u8>>],
        deleted: &[usize],
    ) -> Vec<u8> {
        let record_len: usize = 1 + fields.iter().map(|f| f.2 as usize).sum::<usize>();
        let header_len = 32 + fields.len() * 32 + 1;

        let mut out = vec![0x03, 124, 1, 1];
        out.extend_from_slice(&(rows.len() as u32).to_le_bytes());
        out.extend_from_slice(&(header_len as u16).to_le_bytes());
        out.extend_from_slice(&(record_len as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 20]);

        for (name, kind, len, decimals) in fields {
            let mut descriptor = [0u8; 32];
            descriptor[..name.len()].copy_from_slice(name.as_bytes());
            descriptor[11] = *kind as u8;
            descriptor[16] = *len;
            descriptor[17] = *decimals;
            out.extend_from_slice(&descriptor);
        }
        out.push(0x0D);

        for (idx, row) in rows.iter().enumerate() {
            out.push(if deleted.contains(&idx) { b'*' } else { b' ' });
            for (value, field) in row.iter().zip(fields) {
                let mut cell = value.clone();
                cell.resize(field.2 as usize, b' ');
                out.extend_from_slice(&cell);
            }
        }
        out.push(0x1A);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::writer::dbf_file;
    use super::*;

    fn sample() -> Vec<u8> {
        dbf_file(
            &[
                ("nimi", 'C', 20, 0),
                ("kunta", 'C', 20, 0),
                ("ala_ha", 'N', 10, 2),
                ("vuosi", 'N', 4, 0),
                ("paiva", 'D', 8, 0),
                ("suojeltu", 'L', 1, 0),
            ],
            &[
                vec![b"Kuusikko".to_vec(), b"H\xe4meenlinna".to_vec(), b"12.50".to_vec(), b"2021".to_vec(), b"20240131".to_vec(), b"T".to_vec()],
                vec![b"Poistettu".to_vec(), b"".to_vec(), b"".to_vec(), b"".to_vec(), b"".to_vec(), b"?".to_vec()],
                vec!["HÃ¤rkÃ¤neva".as_bytes().to_vec(), b"".to_vec(), b"".to_vec(), b"****".to_vec(), b"".to_vec(), b"N".to_vec()],
            ],
            &[1],
        )
    }

    #[test]
    fn test_parse_fields_and_values() {
        let table = parse_dbf(&sample(), TextEncoding::Detect).unwrap();
        assert_eq!(
            table.column_names(),
            vec!["nimi", "kunta", "ala_ha", "vuosi", "paiva", "suojeltu"]
        );
        assert_eq!(table.records.len(), 3);

        let first = table.records[0].as_ref().unwrap();
        assert_eq!(first["nimi"], "Kuusikko");
        assert_eq!(first["kunta"], "Hämeenlinna");
        assert_eq!(first["ala_ha"].as_f64(), Some(12.5));
        assert_eq!(first["vuosi"].as_i64(), Some(2021));
        assert_eq!(first["paiva"], "2024-01-31");
        assert_eq!(first["suojeltu"], true);
    }

    #[test]
    fn test_deleted_and_empty_values() {
        let table = parse_dbf(&sample(), TextEncoding::Detect).unwrap();
        assert!(table.records[1].is_none());

        let third = table.records[2].as_ref().unwrap();
        assert_eq!(third["nimi"], "Härkäneva");
        assert_eq!(third["kunta"], Value::Null);
        assert_eq!(third["ala_ha"], Value::Null);
        assert_eq!(third["vuosi"], Value::Null);
        assert_eq!(third["paiva"], Value::Null);
        assert_eq!(third["suojeltu"], false);
    }

    #[test]
    fn test_forced_windows_1252() {
        let bytes = dbf_file(&[("kunta", 'C', 12, 0)], &[vec![b"Pyh\xe4j\xe4rvi".to_vec()]], &[]);
        let table = parse_dbf(&bytes, TextEncoding::Windows1252).unwrap();
        assert_eq!(table.records[0].as_ref().unwrap()["kunta"], "Pyhäjärvi");
    }

    #[test]
    fn test_encoding_from_cpg() {
        assert_eq!(TextEncoding::from_cpg("UTF-8\n"), TextEncoding::Utf8);
        assert_eq!(TextEncoding::from_cpg("1252"), TextEncoding::Windows1252);
        assert_eq!(TextEncoding::from_cpg("ISO-8859-1"), TextEncoding::Windows1252);
        assert_eq!(TextEncoding::from_cpg("whatever"), TextEncoding::Detect);
    }

    #[test]
    fn test_truncated_header() {
        assert!(parse_dbf(&[0x03, 0, 0], TextEncoding::Detect).is_err());
    }
}
