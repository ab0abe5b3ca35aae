//! The canonical price row and its CSV encoding.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Column order of every partition blob.
pub const CSV_HEADER: [&str; 10] = [
    "ticker",
    "date",
    "open",
    "high",
    "low",
    "close",
    "adjusted_close",
    "volume",
    "dividend_amount",
    "split_coefficient",
];

/// One ticker's prices for one day. Unique per `(ticker, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adjusted_close: Option<f64>,
    pub volume: Option<i64>,
    pub dividend_amount: Option<f64>,
    pub split_coefficient: Option<f64>,
}

impl PriceRow {
    /// A row with every price field unset.
    pub fn empty(ticker: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            date,
            open: None,
            high: None,
            low: None,
            close: None,
            adjusted_close: None,
            volume: None,
            dividend_amount: None,
            split_coefficient: None,
        }
    }

    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.ticker, self.date)
    }
}

/// Serializes rows as CSV with a header row. An empty slice still gets the header.
pub fn encode_csv(rows: &[PriceRow]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Parses a partition blob back into rows.
pub fn decode_csv(bytes: &[u8]) -> Result<Vec<PriceRow>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    reader.deserialize().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn header_is_written_for_empty_input() {
        let bytes = encode_csv(&[]).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap().trim_end(),
            CSV_HEADER.join(",")
        );
    }

    #[test]
    fn missing_values_become_empty_fields() {
        let mut row = PriceRow::empty("IBM", date("2024-01-02"));
        row.close = Some(161.5);
        row.volume = Some(1200);
        let text = String::from_utf8(encode_csv(&[row.clone()]).unwrap()).unwrap();
        let line = text.lines().nth(1).unwrap();
        assert_eq!(line, "IBM,2024-01-02,,,,161.5,,1200,,");
        assert_eq!(decode_csv(text.as_bytes()).unwrap(), vec![row]);
    }

    #[test]
    fn decode_rejects_garbage() {
        let garbage = b"ticker,date,open\nIBM,not-a-date,1.0\n";
        assert!(decode_csv(garbage).is_err());
    }
}
