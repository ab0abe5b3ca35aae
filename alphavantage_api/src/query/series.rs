use url::Url;

use super::common::{Function, Query};

/// How much history the series endpoint returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputSize {
    /// Latest 100 data points.
    Compact,
    /// Full history. The pipeline always uses this.
    #[default]
    Full,
}

impl OutputSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSize::Compact => "compact",
            OutputSize::Full => "full",
        }
    }
}

/// Query for `TIME_SERIES_DAILY_ADJUSTED`.
#[derive(Clone, Debug)]
pub struct DailyAdjustedQuery {
    pub symbol: String,
    pub output_size: OutputSize,
}

impl DailyAdjustedQuery {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            output_size: OutputSize::Full,
        }
    }

    pub fn with_output_size(mut self, output_size: OutputSize) -> Self {
        self.output_size = output_size;
        self
    }
}

impl Query for DailyAdjustedQuery {
    fn function(&self) -> Function {
        Function::TimeSeriesDailyAdjusted
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn add_extra_params(&self, url: &mut Url) {
        url.query_pairs_mut()
            .append_pair("outputsize", self.output_size.as_str());
    }
}
