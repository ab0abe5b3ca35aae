//! The backfill run: plan, fetch with a progress bar, write, notify.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use stockpipe_lib::notify::{failure_message, notify_best_effort, outcome_message};
use stockpipe_lib::pipeline::{build_fetcher, build_notifier, open_store, require_progress};
use stockpipe_lib::{ObligationStatus, Pipeline, PipelineConfig, RunOutcome};

use super::{today, RunOverrides};
use crate::output::{print_outcome, OutputFormat};

const JOB: &str = "Stock ingestion";

#[derive(Args)]
pub struct BackfillArgs {
    #[command(flatten)]
    pub overrides: RunOverrides,

    /// Plan only: print the obligations and exit without fetching
    #[arg(long)]
    pub dry_run: bool,

    /// Abort the run on the first partition write failure
    #[arg(long)]
    pub fail_fast: bool,
}

pub async fn run(args: &BackfillArgs, mut config: PipelineConfig, format: &OutputFormat) -> Result<()> {
    args.overrides.apply(&mut config)?;
    if args.fail_fast {
        config.fail_fast_writes = true;
    }

    if args.dry_run {
        return super::plan::show(&config, format).await;
    }

    let notifier = build_notifier(&config).await;
    match backfill(&config, format).await {
        Ok(outcome) => {
            let (subject, body) = outcome_message(JOB, &outcome);
            notify_best_effort(notifier.as_ref(), &subject, &body).await;
            require_progress(&outcome)?;
            Ok(())
        }
        Err(e) => {
            let (subject, body) = failure_message(JOB, &e);
            notify_best_effort(notifier.as_ref(), &subject, &body).await;
            Err(e)
        }
    }
}

async fn backfill(config: &PipelineConfig, format: &OutputFormat) -> Result<RunOutcome> {
    let store = open_store(config).await?;
    let fetcher = build_fetcher(config)?;
    let limiter = fetcher.rate_limiter().cloned();
    let pipeline = Pipeline::from_config(config, store, Arc::new(fetcher));

    let plan = pipeline.plan(today()).await?;
    if plan.obligations.is_empty() {
        eprintln!(
            "All {} tickers are covered from {} to {}",
            plan.universe.len(),
            plan.range.start,
            plan.range.end
        );
    } else {
        eprintln!(
            "Backfilling {} missing (ticker, date) pairs across {} tickers",
            plan.missing_pairs(),
            plan.obligations.len()
        );
    }

    let pb = ProgressBar::new(plan.obligations.len() as u64);
    pb.set_style(ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>5}/{len:5} ({eta}) {msg}",
    )?);
    pb.set_message("fetching daily series...");

    let outcome = pipeline
        .execute(plan, |result| {
            pb.inc(1);
            match &result.status {
                ObligationStatus::Fetched { rows } => {
                    pb.set_message(format!("{}: {} rows", result.ticker, rows));
                }
                ObligationStatus::Skipped { reason } => {
                    pb.println(format!("  {} skipped: {}", result.ticker, reason));
                }
                ObligationStatus::Failed { reason, attempts } => {
                    pb.println(format!(
                        "  {} failed after {} attempts: {}",
                        result.ticker, attempts, reason
                    ));
                }
            }
        })
        .await;
    pb.finish_and_clear();
    let outcome = outcome?;

    if let Some(limiter) = limiter {
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

    print_outcome(&outcome, format);
    Ok(outcome)
}
