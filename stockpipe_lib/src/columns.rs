//! Column extraction from loosely formatted CSV.
//!
//! Reference files and sampled blobs come from spreadsheets and other tools,
//! so headers are matched after trimming, lowercasing and dropping a UTF-8 BOM.

use thiserror::Error;

const BOM: char = '\u{feff}';

#[derive(Error, Debug)]
pub enum ColumnError {
    #[error("column '{0}' not found")]
    Missing(String),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Canonical form used for header comparison.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches(BOM).trim().to_lowercase()
}

/// Cuts a partial read back to its last complete line.
///
/// A bounded read almost always ends mid-row; the fragment is dropped rather
/// than parsed as a short record.
pub fn truncate_to_last_line(bytes: &[u8]) -> &[u8] {
    match bytes.iter().rposition(|&b| b == b'\n') {
        Some(pos) => &bytes[..=pos],
        None => bytes,
    }
}

/// Reads the values of one column, looked up case-insensitively.
///
/// Values are trimmed; empty cells are skipped. `max_rows` bounds how many
/// data rows are inspected.
pub fn read_column(
    bytes: &[u8],
    column: &str,
    max_rows: Option<usize>,
) -> Result<Vec<String>, ColumnError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let wanted = normalize_header(column);
    let index = reader
        .headers()?
        .iter()
        .position(|h| normalize_header(h) == wanted)
        .ok_or_else(|| ColumnError::Missing(column.to_string()))?;

    let limit = max_rows.unwrap_or(usize::MAX);
    let mut values = Vec::new();
    for record in reader.records().take(limit) {
        let record = record?;
        if let Some(value) = record.get(index).map(str::trim) {
            if !value.is_empty() {
                values.push(value.to_string());
            }
        }
    }
    Ok(values)
}
