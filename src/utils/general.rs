/// Windows-1252 code points for bytes 0x80..=0x9F. Unassigned bytes keep their C1 control.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Mojibake rarely survives more than a few rounds of re-decoding.
const MAX_FIX_ROUNDS: usize = 3;

pub fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn decode_windows_1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
            _ => b as char,
        })
        .collect()
}

fn encode_windows_1252(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if code <= 0xFF {
                Some(code as u8)
            } else {
                CP1252_HIGH
                    .iter()
                    .position(|&high| high == c)
                    .map(|idx| 0x80 + idx as u8)
            }
        })
        .collect()
}

/// Repairs text that was UTF-8 but got decoded as Latin-1 / Windows-1252
/// ("HÃ¤meenlinna" -> "Hämeenlinna"). Anything that does not round-trip into
/// valid UTF-8 is returned untouched.
pub fn fix_encoding(text: &str) -> String {
    let mut current = text.to_string();

    for _ in 0..MAX_FIX_ROUNDS {
        if current.is_ascii() {
            break;
        }

        let fixed = encode_windows_1252(&current).and_then(|bytes| String::from_utf8(bytes).ok());
        match fixed {
            Some(fixed) if fixed != current => current = fixed,
            _ => break,
        }
    }

    current
}
