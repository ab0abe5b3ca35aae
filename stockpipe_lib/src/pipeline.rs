//! The backfill run, end to end.
//!
//! `Pipeline` is built once by the binary from a [`PipelineConfig`] and owns
//! the shared handles: the store, the price source and the run settings.

use std::sync::Arc;
use std::time::Duration;

use alphavantage_api::Client;
use chrono::NaiveDate;
use serde::Serialize;

use crate::aws::{load_sdk_config, s3_client, sns_client};
use crate::config::{PipelineConfig, RangeSettings, StorageBackend};
use crate::coverage::{CoverageIndex, CoverageOptions, CoverageScan, ScanStats};
use crate::error::{ConfigError, PipelineError};
use crate::fetcher::{PriceFetcher, PriceSource};
use crate::gaps::{resolve_gaps, ExpectedRange, FetchObligation};
use crate::layout::PartitionLayout;
use crate::notify::{LogNotifier, Notifier, SnsNotifier};
use crate::orchestrator::{FetchOrchestrator, DEFAULT_CONCURRENCY};
use crate::outcome::{ObligationResult, RunOutcome, RunStatus};
use crate::overview::OverviewJob;
use crate::partition::PartitionWriter;
use crate::rate_limiter::RateLimiter;
use crate::store::{BlobStore, LocalStore, S3Store};
use crate::tickers::{resolve_universe, TickerSource};

/// Everything decided before the first fetch.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillPlan {
    pub universe: Vec<String>,
    pub range: ExpectedRange,
    pub obligations: Vec<FetchObligation>,
    pub scan: ScanStats,
}

impl BackfillPlan {
    pub fn missing_pairs(&self) -> usize {
        self.obligations.iter().map(FetchObligation::len).sum()
    }
}

pub struct Pipeline {
    store: Arc<dyn BlobStore>,
    source: Arc<dyn PriceSource>,
    layout: PartitionLayout,
    coverage: CoverageOptions,
    range: RangeSettings,
    tickers: TickerSource,
    concurrency: usize,
    pacing: Duration,
    fail_fast_writes: bool,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn BlobStore>,
        source: Arc<dyn PriceSource>,
        layout: PartitionLayout,
    ) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            store,
            source,
            layout,
            coverage: defaults.coverage,
            range: defaults.range,
            tickers: defaults.tickers,
            concurrency: DEFAULT_CONCURRENCY,
            pacing: Duration::ZERO,
            fail_fast_writes: false,
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn BlobStore>,
        source: Arc<dyn PriceSource>,
    ) -> Self {
        Self {
            store,
            source,
            layout: config.layout(),
            coverage: config.coverage,
            range: config.range.clone(),
            tickers: config.tickers.clone(),
            concurrency: config.fetch.concurrency,
            pacing: config.fetch.pacing,
            fail_fast_writes: config.fail_fast_writes,
        }
    }

    pub fn with_tickers(mut self, tickers: TickerSource) -> Self {
        self.tickers = tickers;
        self
    }

    pub fn with_range(mut self, range: RangeSettings) -> Self {
        self.range = range;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize, pacing: Duration) -> Self {
        self.concurrency = concurrency.max(1);
        self.pacing = pacing;
        self
    }

    pub fn with_coverage_options(mut self, coverage: CoverageOptions) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_fail_fast_writes(mut self, fail_fast: bool) -> Self {
        self.fail_fast_writes = fail_fast;
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    pub async fn build_index(&self) -> Result<CoverageScan, PipelineError> {
        Ok(CoverageIndex::scan(Arc::clone(&self.store), &self.layout, self.coverage).await?)
    }

    /// Resolves the universe, scans coverage and computes the obligations.
    pub async fn plan(&self, today: NaiveDate) -> Result<BackfillPlan, PipelineError> {
        let universe =
            resolve_universe(&self.tickers, self.store.as_ref(), &self.layout, self.coverage)
                .await?;
        if universe.is_empty() {
            return Err(PipelineError::Universe(format!(
                "{} yielded no tickers",
                self.tickers.describe()
            )));
        }

        let scan = self.build_index().await?;
        let range = ExpectedRange::plan(
            &scan.index,
            &universe,
            self.range.start_date,
            self.range.fallback_start,
            today,
        );
        let obligations = resolve_gaps(&range, &scan.index, &universe);
        tracing::info!(
            start = %range.start,
            end = %range.end,
            tickers = universe.len(),
            obligations = obligations.len(),
            "Backfill planned"
        );
        Ok(BackfillPlan {
            universe,
            range,
            obligations,
            scan: scan.stats,
        })
    }

    /// Fetches every obligation and writes the results.
    ///
    /// Per-obligation and per-partition problems end up in the returned
    /// outcome. Only a fail-fast write failure is an error here.
    pub async fn execute<F>(
        &self,
        plan: BackfillPlan,
        on_result: F,
    ) -> Result<RunOutcome, PipelineError>
    where
        F: FnMut(&ObligationResult),
    {
        if plan.obligations.is_empty() {
            tracing::info!(
                "Nothing to fetch for {} to {}",
                plan.range.start,
                plan.range.end
            );
            return Ok(RunOutcome::default());
        }

        let orchestrator =
            FetchOrchestrator::new(Arc::clone(&self.source), self.concurrency, self.pacing);
        let report = orchestrator
            .run_with_progress(plan.obligations, on_result)
            .await;
        let mut outcome = report.outcome;

        let writer = PartitionWriter::new(Arc::clone(&self.store), self.layout.clone());
        let summary = writer.write_all(report.rows, self.fail_fast_writes).await?;
        outcome.rows_written = summary.rows_written;
        outcome.partitions_written = summary.partitions_written;
        for failure in &summary.failures {
            outcome.record_write_failure(failure.key(), failure.to_string());
        }

        match outcome.status() {
            RunStatus::Success => tracing::info!("{}", outcome.summary()),
            RunStatus::Partial => tracing::warn!("{}", outcome.summary()),
            RunStatus::Failed => tracing::error!("{}", outcome.summary()),
        }
        Ok(outcome)
    }

    /// `plan` then `execute`.
    pub async fn run(&self, today: NaiveDate) -> Result<RunOutcome, PipelineError> {
        let plan = self.plan(today).await?;
        self.execute(plan, |_| {}).await
    }
}

/// Turns a run with attempted obligations but no successes into an error.
pub fn require_progress(outcome: &RunOutcome) -> Result<(), PipelineError> {
    if outcome.status() == RunStatus::Failed {
        return Err(PipelineError::NoData {
            attempted: outcome.obligations,
        });
    }
    Ok(())
}

pub async fn open_store(config: &PipelineConfig) -> Result<Arc<dyn BlobStore>, ConfigError> {
    let store: Arc<dyn BlobStore> = match config.require_storage()? {
        StorageBackend::Local { root } => Arc::new(LocalStore::new(root.clone())),
        StorageBackend::S3 { bucket } => {
            let sdk = load_sdk_config(&config.aws).await;
            Arc::new(S3Store::new(s3_client(&sdk, &config.aws), bucket.clone()))
        }
    };
    tracing::info!(store = %store.describe(), prefix = %config.prefix, "Storage opened");
    Ok(store)
}

pub fn api_client(config: &PipelineConfig) -> Result<Client, PipelineError> {
    let key = config.require_api_key()?;
    Ok(Client::with_options(
        &config.api.base_url,
        key,
        config.api.timeout,
    )?)
}

/// Price fetcher with the configured retry policy and request budget.
pub fn build_fetcher(config: &PipelineConfig) -> Result<PriceFetcher, PipelineError> {
    let fetcher = PriceFetcher::new(api_client(config)?, config.fetch.retry.clone());
    Ok(match config.fetch.calls_per_minute {
        Some(calls) => fetcher.with_rate_limiter(Arc::new(RateLimiter::per_minute(calls))),
        None => fetcher,
    })
}

/// Overview job drawing on the same request budget and pacing as the
/// price fetcher.
pub fn build_overview_job(
    config: &PipelineConfig,
    store: Arc<dyn BlobStore>,
) -> Result<OverviewJob, PipelineError> {
    let job = OverviewJob::new(api_client(config)?, store, &config.overview.prefix)
        .with_concurrency(config.overview.concurrency)
        .with_retry(config.fetch.retry.clone())
        .with_pacing(config.fetch.pacing);
    Ok(match config.fetch.calls_per_minute {
        Some(calls) => job.with_rate_limiter(Arc::new(RateLimiter::per_minute(calls))),
        None => job,
    })
}

/// SNS when a topic is configured, otherwise log-only.
pub async fn build_notifier(config: &PipelineConfig) -> Arc<dyn Notifier> {
    match &config.sns_topic_arn {
        Some(topic) => {
            let sdk = load_sdk_config(&config.aws).await;
            Arc::new(SnsNotifier::new(sns_client(&sdk), topic.clone()))
        }
        None => {
            tracing::debug!("No SNS topic configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}
