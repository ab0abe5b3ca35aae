//! CLI subcommand implementations.

pub mod backfill;
pub mod coverage;
pub mod overview;
pub mod plan;
pub mod transform;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::Args;
use stockpipe_lib::validation::{validate_date, validate_ticker_list};
use stockpipe_lib::{PipelineConfig, TickerSource};

/// Range and universe overrides shared by `backfill` and `plan`.
#[derive(Args, Debug, Default)]
pub struct RunOverrides {
    /// First date to cover (YYYY-MM-DD); defaults to the day after stored coverage
    #[arg(long)]
    pub start: Option<String>,

    /// Comma-separated tickers, replacing the configured universe
    #[arg(long)]
    pub tickers: Option<String>,

    /// Maximum concurrent upstream requests
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(start) = &self.start {
            config.range.start_date = Some(validate_date(start)?);
        }
        if let Some(list) = &self.tickers {
            config.tickers = TickerSource::List {
                tickers: validate_ticker_list(list)?,
            };
        }
        if let Some(concurrency) = self.concurrency {
            config.fetch.concurrency = concurrency;
        }
        config.validate()?;
        Ok(())
    }
}

/// The run date. Backfills always end today, UTC.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpipe_lib::config::FileConfig;

    fn config() -> PipelineConfig {
        PipelineConfig::from_sources(FileConfig::default(), &|_| None).unwrap()
    }

    #[test]
    fn overrides_replace_range_and_universe() {
        let mut cfg = config();
        let overrides = RunOverrides {
            start: Some("2024-03-01".into()),
            tickers: Some("msft, aapl".into()),
            concurrency: Some(2),
        };
        overrides.apply(&mut cfg).unwrap();
        assert_eq!(cfg.range.start_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(
            cfg.tickers,
            TickerSource::List {
                tickers: vec!["MSFT".into(), "AAPL".into()]
            }
        );
        assert_eq!(cfg.fetch.concurrency, 2);
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut cfg = config();
        let overrides = RunOverrides {
            start: Some("03/01/2024".into()),
            ..Default::default()
        };
        assert!(overrides.apply(&mut cfg).is_err());

        let zero = RunOverrides {
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(zero.apply(&mut config()).is_err());
    }

    #[test]
    fn no_overrides_keep_configuration() {
        let mut cfg = config();
        RunOverrides::default().apply(&mut cfg).unwrap();
        assert_eq!(cfg, config());
    }
}
