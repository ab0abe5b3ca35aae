use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use stockpipe_lib::alphavantage_api::types::DailyAdjustedResponse;
use stockpipe_lib::config::RangeSettings;
use stockpipe_lib::pipeline::require_progress;
use stockpipe_lib::row::decode_csv;
use stockpipe_lib::store::ListPage;
use stockpipe_lib::{
    normalize, BlobStore, CoverageIndex, CoverageOptions, FetchError, FetchOutcome,
    MemoryStore, ObligationStatus, PartitionLayout, PartitionScheme, PartitionWriter,
    Pipeline, PipelineError, PriceRow, PriceSource, RunStatus, StoreError, TickerSource,
};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn row(ticker: &str, date: &str, close: f64) -> PriceRow {
    PriceRow {
        close: Some(close),
        adjusted_close: Some(close),
        volume: Some(1000),
        ..PriceRow::empty(ticker, d(date))
    }
}

fn list(tickers: &[&str]) -> TickerSource {
    TickerSource::List {
        tickers: tickers.iter().map(|t| t.to_string()).collect(),
    }
}

fn range_from(start: &str) -> RangeSettings {
    RangeSettings {
        start_date: Some(d(start)),
        fallback_start: d("2020-01-01"),
    }
}

/// Serves a full daily history between `first` and `last` for any ticker,
/// except `EMPTY` (no data) and `FAIL` (exhausted retries).
struct HistorySource {
    first: NaiveDate,
    last: NaiveDate,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl HistorySource {
    fn new(first: &str, last: &str) -> Arc<Self> {
        Arc::new(Self {
            first: d(first),
            last: d(last),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for HistorySource {
    async fn fetch(&self, ticker: &str) -> Result<FetchOutcome, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(ticker.to_string());
        match ticker {
            "EMPTY" => Ok(FetchOutcome::Empty {
                reason: "no time series returned".to_string(),
            }),
            "FAIL" => Err(FetchError::Exhausted {
                attempts: 3,
                source: stockpipe_lib::alphavantage_api::Error::HttpStatus {
                    status: 503,
                    body: "unavailable".to_string(),
                },
            }),
            _ => Ok(FetchOutcome::Rows(
                self.first
                    .iter_days()
                    .take_while(|day| *day <= self.last)
                    .map(|day| row(ticker, &day.to_string(), 10.0))
                    .collect(),
            )),
        }
    }
}

/// Store whose writes fail for keys containing `poison`.
struct FlakyStore {
    inner: MemoryStore,
    poison: String,
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn list_page(&self, prefix: &str, token: Option<String>) -> Result<ListPage, StoreError> {
        self.inner.list_page(prefix, token).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        if key.contains(&self.poison) {
            return Err(StoreError::Backend(format!("refusing write to {}", key)));
        }
        self.inner.put(key, bytes).await
    }

    fn describe(&self) -> String {
        "flaky memory store".to_string()
    }
}

fn snapshot(store: &MemoryStore) -> BTreeMap<String, Vec<u8>> {
    store
        .keys()
        .into_iter()
        .filter_map(|k| store.get_sync(&k).map(|v| (k, v)))
        .collect()
}

fn by_date() -> PartitionLayout {
    PartitionLayout::new("stock_prices", PartitionScheme::ByDate)
}

// =============================================================================
// Gap resolution against a seeded store
// =============================================================================

#[tokio::test]
async fn backfill_fills_only_missing_pairs() {
    let store = Arc::new(MemoryStore::new());
    let layout = by_date();
    let writer = PartitionWriter::new(store.clone(), layout.clone());
    writer
        .write_all(
            vec![
                row("AAA", "2024-01-01", 1.0),
                row("BBB", "2024-01-01", 2.0),
                row("AAA", "2024-01-02", 3.0),
            ],
            true,
        )
        .await
        .unwrap();

    let source = HistorySource::new("2023-12-01", "2024-01-10");
    let pipeline = Pipeline::new(store.clone(), source.clone(), layout.clone())
        .with_tickers(list(&["AAA", "BBB"]))
        .with_range(range_from("2024-01-01"));

    let plan = pipeline.plan(d("2024-01-03")).await.unwrap();
    assert_eq!(plan.obligations.len(), 2);
    assert_eq!(plan.obligations[0].ticker, "AAA");
    assert_eq!(plan.obligations[0].missing.iter().copied().collect::<Vec<_>>(), vec![d("2024-01-03")]);
    assert_eq!(plan.obligations[1].ticker, "BBB");
    assert_eq!(
        plan.obligations[1].missing.iter().copied().collect::<Vec<_>>(),
        vec![d("2024-01-02"), d("2024-01-03")]
    );
    assert_eq!(plan.missing_pairs(), 3);

    let outcome = pipeline.execute(plan, |_| {}).await.unwrap();
    assert_eq!(outcome.status(), RunStatus::Success);
    assert_eq!(outcome.success, 2);
    assert_eq!(outcome.rows_written, 3);
    assert_eq!(outcome.partitions_written, 2);

    // Pre-existing rows survive the merge untouched.
    let jan2 = decode_csv(&store.get_sync(&layout.key_for_date(d("2024-01-02"))).unwrap()).unwrap();
    assert_eq!(jan2.len(), 2);
    assert_eq!(jan2[0].ticker, "AAA");
    assert_eq!(jan2[0].close, Some(3.0));
    assert_eq!(jan2[1].ticker, "BBB");

    let jan1 = decode_csv(&store.get_sync(&layout.key_for_date(d("2024-01-01"))).unwrap()).unwrap();
    assert_eq!(jan1.iter().map(|r| r.close).collect::<Vec<_>>(), vec![Some(1.0), Some(2.0)]);
}

#[tokio::test]
async fn coverage_derived_start_begins_after_oldest_high_water_mark() {
    let store = Arc::new(MemoryStore::new());
    let layout = by_date();
    PartitionWriter::new(store.clone(), layout.clone())
        .write_all(
            vec![
                row("AAA", "2024-01-01", 1.0),
                row("AAA", "2024-01-02", 1.0),
                row("AAA", "2024-01-03", 1.0),
                row("BBB", "2024-01-01", 1.0),
            ],
            true,
        )
        .await
        .unwrap();

    let pipeline = Pipeline::new(store, HistorySource::new("2024-01-01", "2024-01-05"), layout)
        .with_tickers(list(&["AAA", "BBB"]))
        .with_range(RangeSettings {
            start_date: None,
            fallback_start: d("2020-01-01"),
        });

    let plan = pipeline.plan(d("2024-01-04")).await.unwrap();
    assert_eq!(plan.range.start, d("2024-01-02"));
    assert_eq!(plan.range.end, d("2024-01-04"));
    let missing: HashMap<&str, usize> = plan
        .obligations
        .iter()
        .map(|o| (o.ticker.as_str(), o.len()))
        .collect();
    assert_eq!(missing["AAA"], 1);
    assert_eq!(missing["BBB"], 3);
}

// =============================================================================
// Idempotence and determinism
// =============================================================================

#[tokio::test]
async fn second_run_fetches_nothing_and_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let source = HistorySource::new("2023-12-25", "2024-01-10");
    let pipeline = Pipeline::new(store.clone(), source.clone(), by_date())
        .with_tickers(list(&["AAA", "BBB"]))
        .with_range(range_from("2024-01-01"));

    let first = pipeline.run(d("2024-01-05")).await.unwrap();
    assert_eq!(first.status(), RunStatus::Success);
    assert_eq!(first.rows_written, 10);
    assert_eq!(first.partitions_written, 5);
    assert_eq!(source.calls(), 2);
    let after_first = snapshot(&store);

    let plan = pipeline.plan(d("2024-01-05")).await.unwrap();
    assert!(plan.obligations.is_empty());
    let second = pipeline.execute(plan, |_| {}).await.unwrap();
    assert_eq!(second.obligations, 0);
    assert_eq!(second.status(), RunStatus::Success);
    assert_eq!(source.calls(), 2);
    assert_eq!(snapshot(&store), after_first);
}

#[tokio::test]
async fn universe_larger_than_sample_bounds_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let universe: Vec<String> = (0..503).map(|i| format!("T{:03}", i)).collect();
    let source = HistorySource::new("2024-01-01", "2024-01-02");
    let pipeline = Pipeline::new(store.clone(), source.clone(), by_date())
        .with_tickers(TickerSource::List { tickers: universe })
        .with_range(range_from("2024-01-01"))
        .with_coverage_options(CoverageOptions::default());

    let first = pipeline.run(d("2024-01-02")).await.unwrap();
    assert_eq!(first.obligations, 503);
    assert_eq!(first.rows_written, 1006);
    assert_eq!(source.calls(), 503);

    let plan = pipeline.plan(d("2024-01-02")).await.unwrap();
    assert!(
        plan.obligations.is_empty(),
        "still owed: {:?}",
        plan.obligations.iter().map(|o| &o.ticker).collect::<Vec<_>>()
    );
    assert_eq!(plan.scan.partitions_read, 2);
}

#[tokio::test]
async fn stale_ticker_does_not_hold_back_the_others() {
    let store = Arc::new(MemoryStore::new());
    let layout = by_date();
    let mut seed = vec![row("EMPTY", "2024-01-01", 1.0), row("EMPTY", "2024-01-02", 1.0)];
    seed.extend(
        d("2024-01-01")
            .iter_days()
            .take(8)
            .filter(|day| *day != d("2024-01-06"))
            .map(|day| row("AAA", &day.to_string(), 1.0)),
    );
    PartitionWriter::new(store.clone(), layout.clone())
        .write_all(seed, true)
        .await
        .unwrap();

    let source = HistorySource::new("2024-01-01", "2024-01-09");
    let pipeline = Pipeline::new(store.clone(), source.clone(), layout)
        .with_tickers(list(&["AAA", "EMPTY"]))
        .with_range(RangeSettings {
            start_date: None,
            fallback_start: d("2020-01-01"),
        });

    let first = pipeline.plan(d("2024-01-09")).await.unwrap();
    assert_eq!(first.range.start, d("2024-01-03"));
    let owed: Vec<(&str, usize)> = first
        .obligations
        .iter()
        .map(|o| (o.ticker.as_str(), o.len()))
        .collect();
    assert_eq!(owed, vec![("AAA", 1), ("EMPTY", 7)]);
    pipeline.execute(first, |_| {}).await.unwrap();

    for _ in 0..2 {
        let plan = pipeline.plan(d("2024-01-09")).await.unwrap();
        let tickers: Vec<&str> = plan.obligations.iter().map(|o| o.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["EMPTY"]);
        pipeline.execute(plan, |_| {}).await.unwrap();
    }
    let aaa_fetches = source.seen.lock().unwrap().iter().filter(|t| *t == "AAA").count();
    assert_eq!(aaa_fetches, 1);
}

#[tokio::test]
async fn identical_inputs_produce_identical_partitions() {
    let mut snapshots = Vec::new();
    for concurrency in [1, 4] {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(
            store.clone(),
            HistorySource::new("2024-01-01", "2024-01-31"),
            by_date(),
        )
        .with_tickers(list(&["MSFT", "AAPL", "GOOG", "AMZN", "aapl"]))
        .with_range(range_from("2024-01-10"))
        .with_concurrency(concurrency, Duration::ZERO);
        pipeline.run(d("2024-01-12")).await.unwrap();
        snapshots.push(snapshot(&store));
    }
    assert_eq!(snapshots[0].len(), 3);
    assert_eq!(snapshots[0], snapshots[1]);
}

#[tokio::test]
async fn ticker_layout_round_trips_through_coverage() {
    let store = Arc::new(MemoryStore::new());
    let layout = PartitionLayout::new("prices", PartitionScheme::ByTicker);
    let source = HistorySource::new("2024-01-01", "2024-01-10");
    let pipeline = Pipeline::new(store.clone(), source.clone(), layout.clone())
        .with_tickers(list(&["AAA", "BBB"]))
        .with_range(range_from("2024-01-01"));

    pipeline.run(d("2024-01-03")).await.unwrap();
    assert!(store.get_sync("prices/ticker=AAA/stock_prices.csv").is_some());
    assert!(store.get_sync("prices/ticker=BBB/stock_prices.csv").is_some());

    let index = CoverageIndex::build(store.clone(), &layout, CoverageOptions::default())
        .await
        .unwrap();
    assert_eq!(index.pair_count(), 6);
    assert_eq!(index.high_water_mark("AAA"), Some(d("2024-01-03")));

    // A later day only adds the new date to each ticker's file.
    pipeline.run(d("2024-01-04")).await.unwrap();
    assert_eq!(source.calls(), 4);
    let aaa = decode_csv(&store.get_sync("prices/ticker=AAA/stock_prices.csv").unwrap()).unwrap();
    assert_eq!(aaa.len(), 4);
    assert_eq!(aaa.last().unwrap().date, d("2024-01-04"));
}

// =============================================================================
// Normalization through the writer
// =============================================================================

#[tokio::test]
async fn normalized_fixture_survives_write_and_read_back() {
    let response: DailyAdjustedResponse =
        serde_json::from_str(include_str!("fixtures/daily_adjusted_aaa.json")).unwrap();
    let rows = normalize("AAA", &response.into_series().unwrap());
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].date, d("2024-01-01"));
    assert_eq!(rows[1].dividend_amount, Some(0.12));
    assert_eq!(rows[2].volume, Some(1_204_300));

    let store = Arc::new(MemoryStore::new());
    let layout = by_date();
    let summary = PartitionWriter::new(store.clone(), layout.clone())
        .write_all(rows.clone(), true)
        .await
        .unwrap();
    assert_eq!(summary.partitions_written, 3);
    assert_eq!(summary.rows_written, 3);

    let mut read_back = Vec::new();
    for key in store.keys() {
        read_back.extend(decode_csv(&store.get_sync(&key).unwrap()).unwrap());
    }
    read_back.sort_by_key(|r| r.date);
    assert_eq!(read_back, rows);

    let index = CoverageIndex::build(store, &layout, CoverageOptions::default())
        .await
        .unwrap();
    assert!(index.contains("AAA", d("2024-01-02")));
    assert!(!index.contains("AAA", d("2024-01-04")));
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn empty_ticker_is_skipped_without_failing_the_run() {
    let store = Arc::new(MemoryStore::new());
    let source = HistorySource::new("2024-01-01", "2024-01-05");
    let pipeline = Pipeline::new(store.clone(), source.clone(), by_date())
        .with_tickers(list(&["AAA", "BBB", "CCC", "EMPTY"]))
        .with_range(range_from("2024-01-01"));

    let mut reported = Vec::new();
    let plan = pipeline.plan(d("2024-01-02")).await.unwrap();
    let outcome = pipeline
        .execute(plan, |r| reported.push(r.ticker.clone()))
        .await
        .unwrap();

    assert_eq!(outcome.obligations, 4);
    assert_eq!(outcome.success, 3);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.status(), RunStatus::Success);
    assert_eq!(outcome.rows_written, 6);
    assert_eq!(reported.len(), 4);
    assert!(outcome.report(20).contains("EMPTY [skipped]"));
    assert!(require_progress(&outcome).is_ok());
}

#[tokio::test]
async fn exhausted_ticker_makes_run_partial() {
    let store = Arc::new(MemoryStore::new());
    let source = HistorySource::new("2024-01-01", "2024-01-05");
    let pipeline = Pipeline::new(store.clone(), source, by_date())
        .with_tickers(list(&["AAA", "FAIL"]))
        .with_range(range_from("2024-01-01"));

    let plan = pipeline.plan(d("2024-01-01")).await.unwrap();
    let mut statuses = HashMap::new();
    let outcome = pipeline
        .execute(plan, |r| {
            statuses.insert(r.ticker.clone(), r.status.clone());
        })
        .await
        .unwrap();

    assert_eq!(outcome.status(), RunStatus::Partial);
    assert_eq!(outcome.failed, 1);
    assert!(matches!(
        statuses["FAIL"],
        ObligationStatus::Failed { attempts: 3, .. }
    ));
    let jan1 = decode_csv(&store.get_sync("stock_prices/2024-01-01_stock_prices.csv").unwrap()).unwrap();
    assert_eq!(jan1.len(), 1);
    assert_eq!(jan1[0].ticker, "AAA");
}

#[tokio::test]
async fn run_with_no_successes_is_failed() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(store.clone(), HistorySource::new("2024-01-01", "2024-01-05"), by_date())
        .with_tickers(list(&["EMPTY", "FAIL"]))
        .with_range(range_from("2024-01-01"));

    let outcome = pipeline.run(d("2024-01-03")).await.unwrap();
    assert_eq!(outcome.status(), RunStatus::Failed);
    assert!(store.is_empty());
    assert!(matches!(
        require_progress(&outcome),
        Err(PipelineError::NoData { attempted: 2 })
    ));
}

#[tokio::test]
async fn write_failure_is_isolated_to_its_partition() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        poison: "2024-01-02".to_string(),
    });
    let pipeline = Pipeline::new(store.clone(), HistorySource::new("2024-01-01", "2024-01-05"), by_date())
        .with_tickers(list(&["AAA"]))
        .with_range(range_from("2024-01-01"));

    let outcome = pipeline.run(d("2024-01-03")).await.unwrap();
    assert_eq!(outcome.success, 1);
    assert_eq!(outcome.write_failures, 1);
    assert_eq!(outcome.partitions_written, 2);
    assert_eq!(outcome.status(), RunStatus::Partial);
    assert!(outcome.report(5).contains("[write failed]"));

    let keys: HashSet<String> = store.inner.keys().into_iter().collect();
    assert!(keys.contains("stock_prices/2024-01-01_stock_prices.csv"));
    assert!(!keys.contains("stock_prices/2024-01-02_stock_prices.csv"));
    assert!(keys.contains("stock_prices/2024-01-03_stock_prices.csv"));
}

#[tokio::test]
async fn fail_fast_write_aborts_the_run() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        poison: "2024-01-01".to_string(),
    });
    let pipeline = Pipeline::new(store.clone(), HistorySource::new("2024-01-01", "2024-01-05"), by_date())
        .with_tickers(list(&["AAA"]))
        .with_range(range_from("2024-01-01"))
        .with_fail_fast_writes(true);

    let err = pipeline.run(d("2024-01-03")).await.unwrap_err();
    assert!(matches!(err, PipelineError::WriteAborted(_)));
    assert!(store.inner.is_empty());
}

#[tokio::test]
async fn corrupt_partition_is_left_untouched() {
    let store = Arc::new(MemoryStore::new());
    let layout = by_date();
    let key = layout.key_for_date(d("2024-01-02"));
    store.insert(key.clone(), "symbol,price\nAAA,1\n");

    let pipeline = Pipeline::new(store.clone(), HistorySource::new("2024-01-01", "2024-01-05"), layout)
        .with_tickers(list(&["AAA"]))
        .with_range(range_from("2024-01-01"));
    let outcome = pipeline.run(d("2024-01-03")).await.unwrap();

    assert_eq!(outcome.write_failures, 1);
    assert_eq!(outcome.status(), RunStatus::Partial);
    assert_eq!(
        store.get_sync(&key).unwrap(),
        b"symbol,price\nAAA,1\n".to_vec()
    );
}

// =============================================================================
// Edge cases
// =============================================================================

#[tokio::test]
async fn start_after_today_makes_no_requests() {
    let store = Arc::new(MemoryStore::new());
    let source = HistorySource::new("2024-01-01", "2024-12-31");
    let pipeline = Pipeline::new(store.clone(), source.clone(), by_date())
        .with_tickers(list(&["AAA", "BBB"]))
        .with_range(range_from("2024-03-01"));

    let plan = pipeline.plan(d("2024-02-01")).await.unwrap();
    assert!(plan.range.is_empty());
    assert!(plan.obligations.is_empty());

    let outcome = pipeline.execute(plan, |_| {}).await.unwrap();
    assert_eq!(outcome.obligations, 0);
    assert_eq!(outcome.status(), RunStatus::Success);
    assert_eq!(source.calls(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn empty_universe_is_an_error() {
    let pipeline = Pipeline::new(
        Arc::new(MemoryStore::new()),
        HistorySource::new("2024-01-01", "2024-01-05"),
        by_date(),
    )
    .with_tickers(list(&["", "  "]));

    let err = pipeline.plan(d("2024-01-05")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Universe(_)));
}

#[tokio::test]
async fn discovery_bootstraps_on_an_empty_store() {
    let source = HistorySource::new("2024-01-01", "2024-01-05");
    let pipeline = Pipeline::new(Arc::new(MemoryStore::new()), source.clone(), by_date())
        .with_tickers(TickerSource::Discover {
            sample_keys: 5,
            bootstrap: "aapl".to_string(),
        })
        .with_range(range_from("2024-01-01"));

    let plan = pipeline.plan(d("2024-01-02")).await.unwrap();
    assert_eq!(plan.universe, vec!["AAPL"]);
    pipeline.execute(plan, |_| {}).await.unwrap();
    assert_eq!(source.seen.lock().unwrap().as_slice(), ["AAPL"]);
}
