mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stockpipe_lib::PipelineConfig;

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "stockpipe")]
#[command(about = "Incremental daily price backfill from Alpha Vantage into partitioned storage")]
struct Cli {
    /// Output format: table or json
    #[arg(long, default_value = "table", global = true)]
    output: String,

    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and store every missing (ticker, date) pair up to today
    Backfill(commands::backfill::BackfillArgs),
    /// Show what a backfill would fetch, without fetching
    Plan(commands::plan::PlanArgs),
    /// Summarize stored coverage per ticker
    Coverage,
    /// Ingest company overviews for the ticker universe
    Overview(commands::overview::OverviewArgs),
    /// Run the downstream transform project (deps, then build)
    Transform(commands::transform::TransformArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stockpipe_lib=info".parse()?)
                .add_directive("stockpipe=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::parse(&cli.output);
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Backfill(args) => commands::backfill::run(args, config, &format).await?,
        Commands::Plan(args) => commands::plan::run(args, config, &format).await?,
        Commands::Coverage => commands::coverage::run(&config, &format).await?,
        Commands::Overview(args) => commands::overview::run(args, config, &format).await?,
        Commands::Transform(args) => commands::transform::run(args, config).await?,
    }

    Ok(())
}
