//! CSV decoding for spreadsheet exports. Uses the `csv` crate.
//!
//! Exports are header-less from our point of view (the parsers locate headers themselves) and
//! ragged: rows may have different lengths.

use crate::domain::DomainError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode CSV bytes into a grid of text cells.
pub fn decode_grid(bytes: &[u8]) -> Result<Vec<Vec<String>>, DomainError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut grid = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| DomainError::Fetch(format!("csv decode: {}", e)))?;
        grid.push(record.iter().map(str::to_string).collect());
    }
    Ok(grid)
}
