//! Library layer for stockpipe: incremental equity price backfill.
//!
//! Builds a coverage index from the partitioned store, resolves the missing
//! `(ticker, date)` pairs, fetches them from Alpha Vantage under a
//! concurrency cap and request budget, and merges the rows back into the
//! partitions. Also hosts the company overview ingest and the downstream
//! transform job.

pub mod aws;
pub mod columns;
pub mod config;
pub mod coverage;
pub mod error;
pub mod fetcher;
pub mod gaps;
pub mod layout;
pub mod normalize;
pub mod notify;
pub mod orchestrator;
pub mod outcome;
pub mod overview;
pub mod partition;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;
pub mod row;
pub mod store;
pub mod tickers;
pub mod transform;
pub mod validation;

pub use alphavantage_api;

pub use config::{PipelineConfig, StorageBackend};
pub use coverage::{CoverageIndex, CoverageOptions};
pub use error::{ConfigError, PipelineError};
pub use fetcher::{FetchError, FetchOutcome, PriceFetcher, PriceSource};
pub use gaps::{expected_dates, resolve_gaps, ExpectedRange, FetchObligation};
pub use layout::{PartitionLayout, PartitionScheme};
pub use normalize::normalize;
pub use orchestrator::{FetchOrchestrator, FetchReport};
pub use outcome::{ObligationResult, ObligationStatus, RunOutcome, RunStatus};
pub use partition::{PartitionWriter, WriteError};
pub use pipeline::{BackfillPlan, Pipeline};
pub use retry::RetryPolicy;
pub use row::PriceRow;
pub use store::{BlobStore, LocalStore, MemoryStore, S3Store, StoreError};
pub use tickers::TickerSource;
