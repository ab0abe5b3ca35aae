//! Coverage index: which `(ticker, date)` pairs already exist in the store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::columns::{read_column, truncate_to_last_line};
use crate::layout::{PartitionKey, PartitionLayout, PartitionScheme};
use crate::store::{BlobStore, StoreError};

/// Read bounds for coverage scans and ticker discovery.
///
/// The coverage scan always reads every row of a partition, since a partial
/// read would report the trailing tickers as missing. The sample bounds only
/// apply to [`discover_tickers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageOptions {
    /// Data rows inspected per partition during discovery.
    pub sample_rows: usize,
    /// Bytes fetched per partition during discovery.
    pub sample_bytes: usize,
    /// Partitions read at once.
    pub read_concurrency: usize,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self {
            sample_rows: 500,
            sample_bytes: 256 * 1024,
            read_concurrency: 8,
        }
    }
}

/// Counters from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub keys_listed: usize,
    pub partitions_read: usize,
    pub skipped: usize,
}

/// Per-ticker summary for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickerCoverage {
    pub ticker: String,
    pub days: usize,
    pub first: NaiveDate,
    pub last: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageIndex {
    covered: BTreeMap<String, BTreeSet<NaiveDate>>,
}

#[derive(Debug, Clone, Default)]
pub struct CoverageScan {
    pub index: CoverageIndex,
    pub stats: ScanStats,
}

impl CoverageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ticker: impl Into<String>, date: NaiveDate) {
        self.covered.entry(ticker.into()).or_default().insert(date);
    }

    pub fn contains(&self, ticker: &str, date: NaiveDate) -> bool {
        self.covered
            .get(ticker)
            .is_some_and(|dates| dates.contains(&date))
    }

    pub fn dates(&self, ticker: &str) -> Option<&BTreeSet<NaiveDate>> {
        self.covered.get(ticker)
    }

    /// Latest covered date for `ticker`.
    pub fn high_water_mark(&self, ticker: &str) -> Option<NaiveDate> {
        self.covered.get(ticker)?.last().copied()
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.covered.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }

    /// Number of covered `(ticker, date)` pairs.
    pub fn pair_count(&self) -> usize {
        self.covered.values().map(BTreeSet::len).sum()
    }

    pub fn summaries(&self) -> Vec<TickerCoverage> {
        self.covered
            .iter()
            .filter_map(|(ticker, dates)| {
                Some(TickerCoverage {
                    ticker: ticker.clone(),
                    days: dates.len(),
                    first: *dates.first()?,
                    last: *dates.last()?,
                })
            })
            .collect()
    }

    /// Scans every partition under the layout prefix.
    pub async fn build(
        store: Arc<dyn BlobStore>,
        layout: &PartitionLayout,
        options: CoverageOptions,
    ) -> Result<Self, StoreError> {
        Ok(Self::scan(store, layout, options).await?.index)
    }

    /// Like [`CoverageIndex::build`] but also returns scan counters.
    ///
    /// Only listing failures are errors. Partitions that cannot be read or
    /// parsed are logged and counted in `stats.skipped`.
    pub async fn scan(
        store: Arc<dyn BlobStore>,
        layout: &PartitionLayout,
        options: CoverageOptions,
    ) -> Result<CoverageScan, StoreError> {
        let keys = store.list_all(&layout.list_prefix()).await?;
        let mut stats = ScanStats {
            keys_listed: keys.len(),
            ..ScanStats::default()
        };

        let partitions: Vec<(String, PartitionKey)> = keys
            .into_iter()
            .filter_map(|key| layout.parse_key(&key).map(|p| (key, p)))
            .collect();

        let semaphore = Arc::new(Semaphore::new(options.read_concurrency.max(1)));
        let mut join_set = JoinSet::new();
        for (key, partition) in partitions {
            let store = Arc::clone(&store);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| format!("semaphore closed: {}", e))?;
                read_partition(store.as_ref(), &key, &partition)
                    .await
                    .map_err(|reason| format!("{}: {}", key, reason))
            });
        }

        let mut index = CoverageIndex::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(pairs)) => {
                    stats.partitions_read += 1;
                    for (ticker, date) in pairs {
                        index.insert(ticker, date);
                    }
                }
                Ok(Err(reason)) => {
                    stats.skipped += 1;
                    tracing::warn!("Skipping unreadable partition {}", reason);
                }
                Err(e) => {
                    stats.skipped += 1;
                    tracing::warn!("Partition read task failed: {}", e);
                }
            }
        }

        tracing::info!(
            store = %store.describe(),
            keys = stats.keys_listed,
            partitions = stats.partitions_read,
            skipped = stats.skipped,
            tickers = index.covered.len(),
            pairs = index.pair_count(),
            "Coverage index built"
        );
        Ok(CoverageScan { index, stats })
    }
}

/// Reads the tickers listed in the first rows of a by-date partition, within
/// the discovery sample bounds.
pub(crate) async fn sample_tickers(
    store: &dyn BlobStore,
    key: &str,
    options: CoverageOptions,
) -> Result<Vec<String>, String> {
    let bytes = store
        .get_prefix(key, options.sample_bytes)
        .await
        .map_err(|e| e.to_string())?;
    let complete = if bytes.len() < options.sample_bytes {
        &bytes[..]
    } else {
        truncate_to_last_line(&bytes)
    };
    let tickers = read_column(complete, "ticker", Some(options.sample_rows))
        .map_err(|e| e.to_string())?;
    Ok(tickers.into_iter().map(|t| t.to_uppercase()).collect())
}

async fn read_partition(
    store: &dyn BlobStore,
    key: &str,
    partition: &PartitionKey,
) -> Result<Vec<(String, NaiveDate)>, String> {
    let bytes = store.get(key).await.map_err(|e| e.to_string())?;
    match partition {
        PartitionKey::Date(date) => {
            let tickers = read_column(&bytes, "ticker", None).map_err(|e| e.to_string())?;
            Ok(tickers
                .into_iter()
                .map(|t| (t.to_uppercase(), *date))
                .collect())
        }
        PartitionKey::Ticker(ticker) => {
            let raw_dates = read_column(&bytes, "date", None).map_err(|e| e.to_string())?;
            let ticker = ticker.to_uppercase();
            Ok(raw_dates
                .iter()
                .filter_map(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
                .map(|date| (ticker.clone(), date))
                .collect())
        }
    }
}

/// Tickers found in the first `sample_keys` partitions, in sorted key order.
///
/// Used to recover the universe from the store itself when no reference
/// list is configured. For the by-ticker scheme the key names are enough.
pub async fn discover_tickers(
    store: &dyn BlobStore,
    layout: &PartitionLayout,
    sample_keys: usize,
    options: CoverageOptions,
) -> Result<Vec<String>, StoreError> {
    let keys = store.list_all(&layout.list_prefix()).await?;
    let mut found = BTreeSet::new();

    match layout.scheme() {
        PartitionScheme::ByTicker => {
            for key in &keys {
                if let Some(PartitionKey::Ticker(t)) = layout.parse_key(key) {
                    found.insert(t.to_uppercase());
                }
            }
        }
        PartitionScheme::ByDate => {
            let dated = keys
                .iter()
                .filter(|key| layout.parse_key(key).is_some())
                .take(sample_keys);
            for key in dated {
                match sample_tickers(store, key, options).await {
                    Ok(tickers) => found.extend(tickers),
                    Err(reason) => {
                        tracing::warn!(key = %key, "Skipping partition during discovery: {}", reason)
                    }
                }
            }
        }
    }

    Ok(found.into_iter().collect())
}
