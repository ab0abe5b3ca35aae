//! Company overview ingest.
//!
//! Fetches fundamentals for each ticker not already retrieved today, merges
//! them into one combined CSV keyed by `Symbol`, then records the retrievals
//! in a small ledger blob so a rerun on the same day is a no-op.
//!
//! An existing combined file or ledger that cannot be parsed is never
//! overwritten.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alphavantage_api::types::CompanyOverview;
use alphavantage_api::{Client, OverviewQuery};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::error::PipelineError;
use crate::outcome::{ObligationResult, ObligationStatus, RunOutcome};
use crate::partition::WriteError;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::store::{dir_prefix, BlobStore, StoreError};

pub const DEFAULT_OVERVIEW_PREFIX: &str = "company_overview";
pub const DEFAULT_OVERVIEW_CONCURRENCY: usize = 20;
const COMBINED_FILE: &str = "combined_company_overview.csv";
const LEDGER_FILE: &str = "_retrieved.csv";
const SYMBOL: &str = "Symbol";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerEntry {
    ticker: String,
    date_retrieved: NaiveDate,
}

/// Outcome of one overview run.
#[derive(Debug, Default, Serialize)]
pub struct OverviewReport {
    /// Tickers skipped because the ledger already had them for today.
    pub already_current: usize,
    pub outcome: RunOutcome,
}

type Record = BTreeMap<String, String>;
type FetchResult = Result<CompanyOverview, (usize, String)>;

pub struct OverviewJob {
    client: Client,
    store: Arc<dyn BlobStore>,
    prefix: String,
    concurrency: usize,
    retry: RetryPolicy,
    limiter: Option<Arc<RateLimiter>>,
    pacing: Duration,
}

impl OverviewJob {
    pub fn new(client: Client, store: Arc<dyn BlobStore>, prefix: &str) -> Self {
        Self {
            client,
            store,
            prefix: dir_prefix(prefix),
            concurrency: DEFAULT_OVERVIEW_CONCURRENCY,
            retry: RetryPolicy::default(),
            limiter: None,
            pacing: Duration::ZERO,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Every attempt, retries included, waits on `limiter` first.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Delay after each ticker before its concurrency slot is released.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn combined_key(&self) -> String {
        format!("{}{}", self.prefix, COMBINED_FILE)
    }

    pub fn ledger_key(&self) -> String {
        format!("{}{}", self.prefix, LEDGER_FILE)
    }

    pub async fn run(
        &self,
        tickers: &[String],
        now: DateTime<Utc>,
    ) -> Result<OverviewReport, PipelineError> {
        let today = now.date_naive();
        let mut ledger = self.load_ledger().await?;
        let done_today: HashSet<&str> = ledger
            .iter()
            .filter(|e| e.date_retrieved == today)
            .map(|e| e.ticker.as_str())
            .collect();

        let pending: Vec<String> = tickers
            .iter()
            .filter(|t| !done_today.contains(t.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut report = OverviewReport {
            already_current: tickers.len() - pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            tracing::info!("All {} overviews already retrieved today", tickers.len());
            return Ok(report);
        }

        let timestamp = now.to_rfc3339();
        let tracker = self.limiter.as_ref().map(|l| l.tracker());
        let mut fetched: Vec<Record> = Vec::new();
        for (ticker, result) in self.fetch_all(pending).await {
            let status = match result {
                Ok(overview) => match overview.validate() {
                    Ok(overview) => {
                        if let Some(t) = tracker {
                            t.record_data();
                        }
                        fetched.push(to_record(&ticker, &overview, &timestamp));
                        ObligationStatus::Fetched { rows: 1 }
                    }
                    Err(e) => {
                        if let Some(t) = tracker {
                            t.record_empty();
                        }
                        tracing::warn!(ticker = %ticker, "No overview data returned: {}", e);
                        ObligationStatus::Skipped {
                            reason: e.to_string(),
                        }
                    }
                },
                Err((attempts, reason)) => {
                    tracing::error!(ticker = %ticker, "Overview fetch failed: {}", reason);
                    ObligationStatus::Failed { reason, attempts }
                }
            };
            report.outcome.record(&ObligationResult {
                ticker,
                requested: 1,
                status,
            });
        }

        if fetched.is_empty() {
            tracing::warn!("No company overview data returned");
            return Ok(report);
        }

        let key = self.combined_key();
        let existing = match self.store.get(&key).await {
            Ok(bytes) => match read_records(&bytes) {
                Ok(records) => records,
                Err(source) => {
                    // Nothing is recorded in the ledger, so a later run retries.
                    let err = WriteError::Corrupt {
                        key: key.clone(),
                        source,
                    };
                    tracing::error!("{}", err);
                    report.outcome.record_write_failure(&key, err.to_string());
                    return Ok(report);
                }
            },
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        ledger.extend(fetched.iter().filter_map(|r| {
            r.get("ticker").map(|t| LedgerEntry {
                ticker: t.clone(),
                date_retrieved: today,
            })
        }));
        let new_count = fetched.len();
        let merged = merge_records(existing, fetched);
        let bytes = write_records(&merged).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store.put(&key, bytes).await?;
        report.outcome.rows_written = new_count;
        report.outcome.partitions_written = 1;

        self.save_ledger(latest_per_ticker(ledger)).await?;
        tracing::info!(
            key = %key,
            records = merged.len(),
            new = new_count,
            "Combined company overview written"
        );
        Ok(report)
    }

    async fn fetch_all(&self, tickers: Vec<String>) -> Vec<(String, FetchResult)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        for ticker in tickers.iter().cloned() {
            let sem = Arc::clone(&semaphore);
            let client = self.client.clone();
            let retry = self.retry.clone();
            let limiter = self.limiter.clone();
            let pacing = self.pacing;
            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (ticker, Err((0, "semaphore closed".to_string())));
                };
                let query = OverviewQuery::new(ticker.as_str());
                let label = format!("{} overview", ticker);
                let (client, query, limiter) = (&client, &query, &limiter);
                let result = retry
                    .retry_async(&label, |_| true, move |_| async move {
                        if let Some(limiter) = limiter {
                            limiter.acquire().await;
                        }
                        let result = client.get_overview(query).await;
                        if result.is_err() {
                            if let Some(limiter) = limiter {
                                limiter.tracker().record_failure();
                            }
                        }
                        result
                    })
                    .await
                    .map_err(|f| (f.attempts, f.error.to_string()));
                if !pacing.is_zero() {
                    sleep(pacing).await;
                }
                (ticker, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(item) => results.push(item),
                Err(e) => tracing::error!("Overview task ended abnormally: {}", e),
            }
        }
        with_unreported(&tickers, results)
    }

    /// An unreadable ledger aborts the run before any request is made.
    async fn load_ledger(&self) -> Result<Vec<LedgerEntry>, PipelineError> {
        let key = self.ledger_key();
        let bytes = match self.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        reader
            .deserialize()
            .collect::<Result<Vec<LedgerEntry>, _>>()
            .map_err(|source| WriteError::Corrupt { key, source }.into())
    }

    async fn save_ledger(&self, ledger: Vec<LedgerEntry>) -> Result<(), PipelineError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for entry in &ledger {
            writer
                .serialize(entry)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store.put(&self.ledger_key(), bytes).await?;
        Ok(())
    }
}

/// Adds a failure for every ticker whose task never reported, then sorts.
fn with_unreported(
    expected: &[String],
    mut results: Vec<(String, FetchResult)>,
) -> Vec<(String, FetchResult)> {
    let reported: HashSet<String> = results.iter().map(|(t, _)| t.clone()).collect();
    for ticker in expected {
        if !reported.contains(ticker) {
            results.push((
                ticker.clone(),
                Err((0, "overview task aborted before reporting".to_string())),
            ));
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// Keeps only the most recent retrieval of each ticker.
fn latest_per_ticker(ledger: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    let mut latest: BTreeMap<String, NaiveDate> = BTreeMap::new();
    for entry in ledger {
        let date = latest.entry(entry.ticker).or_insert(entry.date_retrieved);
        *date = (*date).max(entry.date_retrieved);
    }
    latest
        .into_iter()
        .map(|(ticker, date_retrieved)| LedgerEntry {
            ticker,
            date_retrieved,
        })
        .collect()
}

fn to_record(ticker: &str, overview: &CompanyOverview, timestamp: &str) -> Record {
    let mut record: Record = overview
        .fields
        .keys()
        .map(|field| (field.clone(), overview.text(field)))
        .collect();
    record.insert("ticker".to_string(), ticker.to_string());
    record.insert("ingest_timestamp".to_string(), timestamp.to_string());
    record
}

/// New records replace old ones with the same `Symbol`. Sorted by symbol.
fn merge_records(existing: Vec<Record>, incoming: Vec<Record>) -> Vec<Record> {
    let mut by_symbol: BTreeMap<String, Record> = BTreeMap::new();
    for record in existing.into_iter().chain(incoming) {
        let symbol = record.get(SYMBOL).cloned().unwrap_or_default();
        by_symbol.insert(symbol, record);
    }
    by_symbol.into_values().collect()
}

/// Header is `Symbol` then every other column seen, sorted.
fn write_records(records: &[Record]) -> Result<Vec<u8>, csv::Error> {
    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.keys().map(String::as_str))
        .filter(|c| *c != SYMBOL)
        .collect();
    let header: Vec<&str> = std::iter::once(SYMBOL).chain(columns).collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header)?;
    for record in records {
        writer.write_record(
            header
                .iter()
                .map(|c| record.get(*c).map(String::as_str).unwrap_or("")),
        )?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

fn read_records(bytes: &[u8]) -> Result<Vec<Record>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader.headers()?.clone();
    reader
        .records()
        .map(|rec| {
            rec.map(|rec| {
                headers
                    .iter()
                    .zip(rec.iter())
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect()
            })
        })
        .collect()
}
