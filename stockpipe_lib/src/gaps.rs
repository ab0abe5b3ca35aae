//! Gap resolution: expected range minus coverage, per ticker.

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::coverage::CoverageIndex;

/// Every calendar day in `[start, end]`. Empty when `start > end`.
///
/// No trading calendar is applied; weekends and holidays simply come back
/// empty from upstream and stay missing.
pub fn expected_dates(start: NaiveDate, end: NaiveDate) -> BTreeSet<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Inclusive date window the run is expected to cover.
///
/// An `incremental` range was derived from coverage rather than configured.
/// Each ticker then only owes the dates after its own high-water mark, so a
/// ticker that stopped trading cannot hold the others back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub incremental: bool,
}

impl ExpectedRange {
    /// A fixed window: every uncovered date in it is owed.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            incremental: false,
        }
    }

    /// A coverage-derived window: covered tickers owe only what follows
    /// their high-water mark.
    pub fn incremental(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            incremental: true,
            ..Self::new(start, end)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        expected_dates(self.start, self.end)
    }

    /// Picks the window ending `today`.
    ///
    /// Start is, in order: the explicit override; the day after the oldest
    /// high-water mark among `tickers` found in `index`; `fallback`. Without
    /// an override the range is incremental.
    pub fn plan(
        index: &CoverageIndex,
        tickers: &[String],
        start_override: Option<NaiveDate>,
        fallback: NaiveDate,
        today: NaiveDate,
    ) -> Self {
        if let Some(start) = start_override {
            return Self::new(start, today);
        }
        let start = tickers
            .iter()
            .filter_map(|t| index.high_water_mark(t))
            .min()
            .and_then(day_after)
            .unwrap_or(fallback);
        Self::incremental(start, today)
    }
}

fn day_after(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(1))
}

/// Work for one ticker: the dates it is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchObligation {
    pub ticker: String,
    pub missing: BTreeSet<NaiveDate>,
}

impl FetchObligation {
    pub fn start(&self) -> Option<NaiveDate> {
        self.missing.first().copied()
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.missing.last().copied()
    }

    pub fn len(&self) -> usize {
        self.missing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }
}

/// One obligation per ticker with at least one uncovered expected date.
///
/// Tickers are de-duplicated and processed in ascending order, so the
/// output depends only on the inputs. For an incremental range a covered
/// ticker's dates start the day after its high-water mark.
pub fn resolve_gaps(
    expected: &ExpectedRange,
    index: &CoverageIndex,
    tickers: &[String],
) -> Vec<FetchObligation> {
    if expected.is_empty() {
        return Vec::new();
    }
    let dates = expected.dates();
    let universe: BTreeSet<&String> = tickers.iter().collect();

    universe
        .into_iter()
        .filter_map(|ticker| {
            let missing: BTreeSet<NaiveDate> = match index.dates(ticker) {
                Some(covered) => {
                    let from = covered
                        .last()
                        .copied()
                        .filter(|_| expected.incremental)
                        .and_then(day_after)
                        .unwrap_or(expected.start);
                    dates
                        .range(from..)
                        .filter(|date| !covered.contains(date))
                        .copied()
                        .collect()
                }
                None => dates.clone(),
            };
            (!missing.is_empty()).then(|| FetchObligation {
                ticker: ticker.clone(),
                missing,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn tickers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expected_dates_are_inclusive_calendar_days() {
        let dates = expected_dates(d("2024-01-05"), d("2024-01-08"));
        assert_eq!(dates.len(), 4);
        assert!(dates.contains(&d("2024-01-06")));
        assert!(expected_dates(d("2024-01-02"), d("2024-01-01")).is_empty());
        assert_eq!(expected_dates(d("2024-01-01"), d("2024-01-01")).len(), 1);
    }

    #[test]
    fn two_ticker_scenario() {
        let mut index = CoverageIndex::new();
        index.insert("AAA", d("2024-01-01"));
        index.insert("AAA", d("2024-01-02"));
        index.insert("BBB", d("2024-01-01"));

        let range = ExpectedRange::new(d("2024-01-01"), d("2024-01-03"));
        let obligations = resolve_gaps(&range, &index, &tickers(&["BBB", "AAA"]));

        assert_eq!(obligations.len(), 2);
        assert_eq!(obligations[0].ticker, "AAA");
        assert_eq!(obligations[0].missing, [d("2024-01-03")].into_iter().collect());
        assert_eq!(obligations[1].ticker, "BBB");
        assert_eq!(
            obligations[1].missing,
            [d("2024-01-02"), d("2024-01-03")].into_iter().collect()
        );
        assert_eq!(obligations[1].start(), Some(d("2024-01-02")));
        assert_eq!(obligations[1].end(), Some(d("2024-01-03")));
    }

    #[test]
    fn fully_covered_tickers_produce_nothing() {
        let mut index = CoverageIndex::new();
        index.insert("AAA", d("2024-01-01"));
        let range = ExpectedRange::new(d("2024-01-01"), d("2024-01-01"));
        assert!(resolve_gaps(&range, &index, &tickers(&["AAA"])).is_empty());
    }

    #[test]
    fn inverted_range_yields_no_obligations() {
        let range = ExpectedRange::new(d("2024-02-01"), d("2024-01-01"));
        assert!(range.is_empty());
        assert!(resolve_gaps(&range, &CoverageIndex::new(), &tickers(&["AAA"])).is_empty());
    }

    #[test]
    fn resolution_is_deterministic_and_deduplicated() {
        let index = CoverageIndex::new();
        let range = ExpectedRange::new(d("2024-01-01"), d("2024-01-02"));
        let a = resolve_gaps(&range, &index, &tickers(&["MSFT", "AAPL", "MSFT"]));
        let b = resolve_gaps(&range, &index, &tickers(&["AAPL", "MSFT"]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn plan_prefers_override_then_high_water_mark_then_fallback() {
        let mut index = CoverageIndex::new();
        index.insert("AAA", d("2024-03-10"));
        index.insert("BBB", d("2024-03-05"));
        index.insert("ZZZ", d("2020-01-01"));
        let universe = tickers(&["AAA", "BBB"]);
        let today = d("2024-03-12");
        let fallback = d("2020-01-01");

        let explicit = ExpectedRange::plan(&index, &universe, Some(d("2024-01-01")), fallback, today);
        assert_eq!(explicit.start, d("2024-01-01"));

        let derived = ExpectedRange::plan(&index, &universe, None, fallback, today);
        assert_eq!(derived, ExpectedRange::incremental(d("2024-03-06"), today));
        assert!(!explicit.incremental);

        let empty = ExpectedRange::plan(&CoverageIndex::new(), &universe, None, fallback, today);
        assert_eq!(empty.start, fallback);
    }

    #[test]
    fn incremental_range_starts_each_ticker_after_its_own_mark() {
        let mut index = CoverageIndex::new();
        index.insert("STALE", d("2024-01-02"));
        for day in expected_dates(d("2024-01-01"), d("2024-01-09")) {
            if day != d("2024-01-06") {
                index.insert("AAA", day);
            }
        }
        let universe = tickers(&["AAA", "NEW", "STALE"]);

        let range = ExpectedRange::plan(&index, &universe, None, d("2020-01-01"), d("2024-01-09"));
        assert_eq!(range.start, d("2024-01-03"));
        let obligations = resolve_gaps(&range, &index, &universe);

        // AAA's hole behind its high-water mark is not re-requested.
        let owed: Vec<(&str, usize)> = obligations
            .iter()
            .map(|o| (o.ticker.as_str(), o.len()))
            .collect();
        assert_eq!(owed, vec![("NEW", 7), ("STALE", 7)]);
    }

    #[test]
    fn fixed_range_still_fills_holes() {
        let mut index = CoverageIndex::new();
        index.insert("AAA", d("2024-01-01"));
        index.insert("AAA", d("2024-01-03"));
        let range = ExpectedRange::new(d("2024-01-01"), d("2024-01-03"));
        let obligations = resolve_gaps(&range, &index, &tickers(&["AAA"]));
        assert_eq!(obligations[0].missing, [d("2024-01-02")].into_iter().collect());
    }
}
