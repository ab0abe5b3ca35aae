use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use stockpipe_lib::pipeline::{build_fetcher, open_store};
use stockpipe_lib::{Pipeline, PipelineConfig};

use super::{today, RunOverrides};
use crate::output::{print_plan, OutputFormat};

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub overrides: RunOverrides,
}

pub async fn run(args: &PlanArgs, mut config: PipelineConfig, format: &OutputFormat) -> Result<()> {
    args.overrides.apply(&mut config)?;
    show(&config, format).await
}

/// Resolves the obligations a backfill would fetch and prints them.
///
/// Credentials are still checked so a plan that succeeds can be run.
pub async fn show(config: &PipelineConfig, format: &OutputFormat) -> Result<()> {
    let store = open_store(config).await?;
    let fetcher = build_fetcher(config)?;
    let pipeline = Pipeline::from_config(config, store, Arc::new(fetcher));
    let plan = pipeline.plan(today()).await?;
    print_plan(&plan, format);
    Ok(())
}
