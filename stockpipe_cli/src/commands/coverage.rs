use anyhow::Result;
use stockpipe_lib::pipeline::open_store;
use stockpipe_lib::{CoverageIndex, PipelineConfig};

use crate::output::{print_coverage, OutputFormat};

/// Scans the configured store and prints per-ticker coverage.
pub async fn run(config: &PipelineConfig, format: &OutputFormat) -> Result<()> {
    config.validate()?;
    let store = open_store(config).await?;
    let scan = CoverageIndex::scan(store, &config.layout(), config.coverage).await?;
    if scan.index.is_empty() {
        eprintln!("No coverage found under '{}'", config.layout().list_prefix());
    }
    print_coverage(&scan.index.summaries(), &scan.stats, format);
    Ok(())
}
