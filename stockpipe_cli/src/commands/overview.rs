//! Company overview ingest for the configured universe.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use stockpipe_lib::notify::{failure_message, notify_best_effort, outcome_message};
use stockpipe_lib::overview::OverviewReport;
use stockpipe_lib::pipeline::{build_notifier, build_overview_job, open_store, require_progress};
use stockpipe_lib::tickers::resolve_universe;
use stockpipe_lib::validation::validate_ticker_list;
use stockpipe_lib::{PipelineConfig, TickerSource};

use crate::output::{print_overview, OutputFormat};

const JOB: &str = "Company overview ingestion";

#[derive(Args)]
pub struct OverviewArgs {
    /// Comma-separated tickers, replacing the configured universe
    #[arg(long)]
    pub tickers: Option<String>,

    /// Maximum concurrent overview requests
    #[arg(long)]
    pub concurrency: Option<usize>,
}

pub async fn run(args: &OverviewArgs, mut config: PipelineConfig, format: &OutputFormat) -> Result<()> {
    if let Some(list) = &args.tickers {
        config.tickers = TickerSource::List {
            tickers: validate_ticker_list(list)?,
        };
    }
    if let Some(concurrency) = args.concurrency {
        config.overview.concurrency = concurrency;
    }
    config.validate()?;

    let notifier = build_notifier(&config).await;
    match ingest(&config).await {
        Ok(report) => {
            print_overview(&report, format);
            if report.outcome.obligations > 0 {
                let (subject, body) = outcome_message(JOB, &report.outcome);
                notify_best_effort(notifier.as_ref(), &subject, &body).await;
            }
            require_progress(&report.outcome)?;
            Ok(())
        }
        Err(e) => {
            let (subject, body) = failure_message(JOB, &e);
            notify_best_effort(notifier.as_ref(), &subject, &body).await;
            Err(e)
        }
    }
}

async fn ingest(config: &PipelineConfig) -> Result<OverviewReport> {
    let store = open_store(config).await?;
    let tickers = resolve_universe(
        &config.tickers,
        store.as_ref(),
        &config.layout(),
        config.coverage,
    )
    .await?;
    eprintln!("Fetching company overviews for {} tickers", tickers.len());

    let job = build_overview_job(config, store)?;
    let report = job.run(&tickers, Utc::now()).await?;

    if let Some(limiter) = job.rate_limiter() {
        let usage = limiter.tracker().summary();
        tracing::info!(
            requests = usage.requests_made,
            with_data = usage.with_data,
            empty = usage.empty,
            failed = usage.failed,
            throttled_secs = usage.throttled_secs,
            "Upstream request usage"
        );
    }
    Ok(report)
}
