//! Groups rows into partitions and writes them back merged.
//!
//! Every write loads the existing blob, merges the new rows in (new rows win
//! on equal `(ticker, date)`), sorts by `(date, ticker)` and replaces the
//! object. Re-running with the same rows therefore produces the same bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use crate::layout::{PartitionKey, PartitionLayout};
use crate::row::{decode_csv, encode_csv, PriceRow};
use crate::store::{BlobStore, StoreError};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to load existing partition {key}: {source}")]
    Load {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("existing blob {key} is unreadable, left untouched: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: csv::Error,
    },
    #[error("failed to encode partition {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write partition {key}: {source}")]
    Put {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl WriteError {
    pub fn key(&self) -> &str {
        match self {
            WriteError::Load { key, .. }
            | WriteError::Corrupt { key, .. }
            | WriteError::Encode { key, .. }
            | WriteError::Put { key, .. } => key,
        }
    }
}

/// Result of [`PartitionWriter::write_all`].
#[derive(Debug, Default)]
pub struct WriteSummary {
    pub partitions_written: usize,
    /// Rows in the written partitions that came from this run.
    pub rows_written: usize,
    pub failures: Vec<WriteError>,
}

pub struct PartitionWriter {
    store: Arc<dyn BlobStore>,
    layout: PartitionLayout,
}

impl PartitionWriter {
    pub fn new(store: Arc<dyn BlobStore>, layout: PartitionLayout) -> Self {
        Self { store, layout }
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Rows bucketed by partition, in key order.
    pub fn group(&self, rows: Vec<PriceRow>) -> BTreeMap<PartitionKey, Vec<PriceRow>> {
        let mut groups: BTreeMap<PartitionKey, Vec<PriceRow>> = BTreeMap::new();
        for row in rows {
            groups.entry(self.layout.partition_of(&row)).or_default().push(row);
        }
        groups
    }

    /// Merges `rows` into the blob at `key` and returns the merged row count.
    pub async fn write(&self, key: &str, rows: Vec<PriceRow>) -> Result<usize, WriteError> {
        let existing = match self.store.get(key).await {
            Ok(bytes) => decode_csv(&bytes).map_err(|source| WriteError::Corrupt {
                key: key.to_string(),
                source,
            })?,
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(source) => {
                return Err(WriteError::Load {
                    key: key.to_string(),
                    source,
                })
            }
        };

        let merged = merge_rows(existing, rows);
        let bytes = encode_csv(&merged).map_err(|source| WriteError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store
            .put(key, bytes)
            .await
            .map_err(|source| WriteError::Put {
                key: key.to_string(),
                source,
            })?;
        Ok(merged.len())
    }

    /// Writes every partition touched by `rows`, one after another.
    ///
    /// Failures are collected and do not stop later partitions unless
    /// `stop_on_error` is set, in which case the first failure is returned.
    pub async fn write_all(
        &self,
        rows: Vec<PriceRow>,
        stop_on_error: bool,
    ) -> Result<WriteSummary, WriteError> {
        let mut summary = WriteSummary::default();
        for (partition, rows) in self.group(rows) {
            let key = self.layout.key_for(&partition);
            let fresh = rows.len();
            match self.write(&key, rows).await {
                Ok(total) => {
                    tracing::debug!(key = %key, new_rows = fresh, total_rows = total, "Partition written");
                    summary.partitions_written += 1;
                    summary.rows_written += fresh;
                }
                Err(e) if stop_on_error => return Err(e),
                Err(e) => {
                    tracing::error!("{}", e);
                    summary.failures.push(e);
                }
            }
        }
        tracing::info!(
            partitions = summary.partitions_written,
            rows = summary.rows_written,
            failures = summary.failures.len(),
            "Write phase complete"
        );
        Ok(summary)
    }
}

/// Last write wins per `(ticker, date)`; output sorted by `(date, ticker)`.
pub fn merge_rows(existing: Vec<PriceRow>, incoming: Vec<PriceRow>) -> Vec<PriceRow> {
    let mut by_key: BTreeMap<(NaiveDate, String), PriceRow> = BTreeMap::new();
    for row in existing.into_iter().chain(incoming) {
        by_key.insert((row.date, row.ticker.clone()), row);
    }
    by_key.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PartitionScheme;
    use crate::store::MemoryStore;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn row(ticker: &str, date: &str, close: f64) -> PriceRow {
        let mut row = PriceRow::empty(ticker, d(date));
        row.close = Some(close);
        row
    }

    #[test]
    fn merge_prefers_incoming_and_sorts() {
        let merged = merge_rows(
            vec![row("BBB", "2024-01-02", 1.0), row("AAA", "2024-01-02", 1.0)],
            vec![row("AAA", "2024-01-02", 2.0), row("AAA", "2024-01-01", 3.0)],
        );
        let keys: Vec<_> = merged.iter().map(|r| (r.ticker.as_str(), r.date)).collect();
        assert_eq!(
            keys,
            vec![
                ("AAA", d("2024-01-01")),
                ("AAA", d("2024-01-02")),
                ("BBB", d("2024-01-02")),
            ]
        );
        assert_eq!(merged[1].close, Some(2.0));
    }

    #[tokio::test]
    async fn write_merges_with_existing_partition() {
        let store = Arc::new(MemoryStore::new());
        let writer = PartitionWriter::new(store.clone(), PartitionLayout::default());
        let key = "stock_prices/2024-01-02_stock_prices.csv";

        writer.write(key, vec![row("AAA", "2024-01-02", 1.0)]).await.unwrap();
        let total = writer.write(key, vec![row("BBB", "2024-01-02", 2.0)]).await.unwrap();
        assert_eq!(total, 2);

        let stored = decode_csv(&store.get_sync(key).unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_partition_is_left_untouched() {
        let store = Arc::new(MemoryStore::new());
        let key = "stock_prices/2024-01-02_stock_prices.csv";
        store.insert(key, "ticker,date\nAAA,not-a-date\n");
        let writer = PartitionWriter::new(store.clone(), PartitionLayout::default());

        let err = writer
            .write(key, vec![row("AAA", "2024-01-02", 1.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Corrupt { .. }));
        assert_eq!(err.key(), key);
        assert_eq!(store.get_sync(key).unwrap(), b"ticker,date\nAAA,not-a-date\n");
    }

    #[tokio::test]
    async fn write_all_groups_by_scheme() {
        let store = Arc::new(MemoryStore::new());
        let rows = vec![
            row("AAA", "2024-01-02", 1.0),
            row("BBB", "2024-01-02", 1.0),
            row("AAA", "2024-01-03", 1.0),
        ];

        let by_date = PartitionWriter::new(store.clone(), PartitionLayout::default());
        let summary = by_date.write_all(rows.clone(), false).await.unwrap();
        assert_eq!(summary.partitions_written, 2);
        assert_eq!(summary.rows_written, 3);

        let by_ticker = PartitionWriter::new(
            store.clone(),
            PartitionLayout::new("by_ticker", PartitionScheme::ByTicker),
        );
        by_ticker.write_all(rows, false).await.unwrap();
        let aaa = decode_csv(&store.get_sync("by_ticker/ticker=AAA/stock_prices.csv").unwrap()).unwrap();
        assert_eq!(aaa.len(), 2);
    }

    #[tokio::test]
    async fn write_all_continues_past_failures_unless_fail_fast() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "stock_prices/2024-01-02_stock_prices.csv",
            "ticker,date\nAAA,yesterday\n",
        );
        let writer = PartitionWriter::new(store.clone(), PartitionLayout::default());
        let rows = vec![row("AAA", "2024-01-02", 1.0), row("AAA", "2024-01-03", 1.0)];

        let summary = writer.write_all(rows.clone(), false).await.unwrap();
        assert_eq!(summary.partitions_written, 1);
        assert_eq!(summary.failures.len(), 1);

        assert!(writer.write_all(rows, true).await.is_err());
    }
}
