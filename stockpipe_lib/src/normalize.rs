//! Flattens the upstream time series into [`PriceRow`]s.

use std::collections::BTreeSet;

use alphavantage_api::types::{DailyBar, TimeSeries, FIELD_LABELS};
use chrono::NaiveDate;

use crate::row::PriceRow;

/// Output column for each upstream label, in upstream order.
const COLUMN_MAP: [(&str, &str); 8] = [
    (FIELD_LABELS[0], "open"),
    (FIELD_LABELS[1], "high"),
    (FIELD_LABELS[2], "low"),
    (FIELD_LABELS[3], "close"),
    (FIELD_LABELS[4], "adjusted_close"),
    (FIELD_LABELS[5], "volume"),
    (FIELD_LABELS[6], "dividend_amount"),
    (FIELD_LABELS[7], "split_coefficient"),
];

/// Coerces a decimal string; anything unparseable or non-finite is `None`.
pub fn parse_decimal(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Coerces a share count. Integral decimals such as `"100.0"` are accepted.
pub fn parse_volume(raw: Option<&str>) -> Option<i64> {
    let s = raw?.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let f = s.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn row_from_bar(ticker: &str, date: NaiveDate, bar: &DailyBar) -> PriceRow {
    let mut row = PriceRow::empty(ticker, date);
    for (label, column) in COLUMN_MAP {
        let raw = bar.get(label);
        match column {
            "open" => row.open = parse_decimal(raw),
            "high" => row.high = parse_decimal(raw),
            "low" => row.low = parse_decimal(raw),
            "close" => row.close = parse_decimal(raw),
            "adjusted_close" => row.adjusted_close = parse_decimal(raw),
            "volume" => row.volume = parse_volume(raw),
            "dividend_amount" => row.dividend_amount = parse_decimal(raw),
            "split_coefficient" => row.split_coefficient = parse_decimal(raw),
            _ => {}
        }
    }
    row
}

/// Converts one symbol's series into rows tagged with `ticker`, ascending by date.
///
/// Entries whose key is not a `YYYY-MM-DD` date are dropped.
pub fn normalize(ticker: &str, series: &TimeSeries) -> Vec<PriceRow> {
    let mut dropped = 0usize;
    let mut rows: Vec<PriceRow> = series
        .iter()
        .filter_map(|(raw_date, bar)| {
            match NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d") {
                Ok(date) => Some(row_from_bar(ticker, date, bar)),
                Err(_) => {
                    dropped += 1;
                    None
                }
            }
        })
        .collect();

    if dropped > 0 {
        tracing::debug!(ticker, dropped, "Dropped series entries with unparseable dates");
    }
    rows.sort_by_key(|r| r.date);
    rows
}

/// Keeps only rows whose date is in `dates`.
pub fn filter_to(rows: Vec<PriceRow>, dates: &BTreeSet<NaiveDate>) -> Vec<PriceRow> {
    rows.into_iter().filter(|r| dates.contains(&r.date)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: &str, volume: &str) -> DailyBar {
        DailyBar {
            open: Some("1.0".into()),
            high: Some("2.0".into()),
            low: Some("0.5".into()),
            close: Some(close.into()),
            adjusted_close: Some(close.into()),
            volume: Some(volume.into()),
            dividend_amount: Some("0.0000".into()),
            split_coefficient: Some("1.0".into()),
        }
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn rows_are_tagged_and_sorted() {
        let mut series = TimeSeries::new();
        series.insert("2024-01-03".into(), bar("1.5", "300"));
        series.insert("2024-01-02".into(), bar("1.4", "200"));
        let rows = normalize("IBM", &series);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d("2024-01-02"));
        assert_eq!(rows[1].date, d("2024-01-03"));
        assert!(rows.iter().all(|r| r.ticker == "IBM"));
        assert_eq!(rows[0].close, Some(1.4));
        assert_eq!(rows[0].volume, Some(200));
        assert_eq!(rows[0].split_coefficient, Some(1.0));
    }

    #[test]
    fn invalid_values_become_none() {
        let mut series = TimeSeries::new();
        series.insert("2024-01-02".into(), bar("n/a", "lots"));
        let rows = normalize("IBM", &series);
        assert_eq!(rows[0].close, None);
        assert_eq!(rows[0].volume, None);
        assert_eq!(rows[0].open, Some(1.0));
    }

    #[test]
    fn unparseable_dates_are_dropped() {
        let mut series = TimeSeries::new();
        series.insert("yesterday".into(), bar("1.0", "1"));
        series.insert("2024-01-02".into(), bar("1.0", "1"));
        assert_eq!(normalize("IBM", &series).len(), 1);
    }

    #[test]
    fn volume_accepts_integral_decimals() {
        assert_eq!(parse_volume(Some("100.0")), Some(100));
        assert_eq!(parse_volume(Some(" 42 ")), Some(42));
        assert_eq!(parse_volume(Some("100.5")), None);
        assert_eq!(parse_volume(Some("NaN")), None);
        assert_eq!(parse_volume(None), None);
    }

    #[test]
    fn decimals_reject_non_finite() {
        assert_eq!(parse_decimal(Some("inf")), None);
        assert_eq!(parse_decimal(Some("185.6400")), Some(185.64));
    }

    #[test]
    fn filter_keeps_requested_dates() {
        let mut series = TimeSeries::new();
        for day in ["2024-01-02", "2024-01-03", "2024-01-04"] {
            series.insert(day.into(), bar("1.0", "1"));
        }
        let wanted: BTreeSet<_> = [d("2024-01-03")].into_iter().collect();
        let rows = filter_to(normalize("IBM", &series), &wanted);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, d("2024-01-03"));
    }
}
