//! Comick CSV export decoder
//!
//! Typical header: `hid,title,type,rating,origination,read,last_read,...`.
//! The title column is located by header name; without one, column 1 is used.

use super::ParseError;

/// UTF-8 BOM bytes
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Title column when the header does not name one
const DEFAULT_TITLE_COLUMN: usize = 1;

fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

/// Titles from every row, blank titles skipped
pub fn parse(data: &[u8]) -> Result<Vec<String>, ParseError> {
    let data = strip_utf8_bom(data);
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let title_column = reader
        .headers()?
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("title"))
        .unwrap_or(DEFAULT_TITLE_COLUMN);

    let mut titles = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(title) = record.get(title_column).map(str::trim) {
            if !title.is_empty() {
                titles.push(title.to_string());
            }
        }
    }

    Ok(titles)
}
