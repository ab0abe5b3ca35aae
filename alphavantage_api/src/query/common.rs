//! Shared query infrastructure: the [`Query`] trait and the [`Function`] selector.

use std::fmt;

use url::Url;

/// Upstream API function selector, sent as the `function` query parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    TimeSeriesDailyAdjusted,
    Overview,
}

impl Function {
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::TimeSeriesDailyAdjusted => "TIME_SERIES_DAILY_ADJUSTED",
            Function::Overview => "OVERVIEW",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait implemented by all query builders.
///
/// The API key is not part of the query; the client appends it so that
/// queries can be logged and compared without leaking credentials.
pub trait Query {
    /// The function this query invokes.
    fn function(&self) -> Function;

    /// The ticker symbol the query targets.
    fn symbol(&self) -> &str;

    /// Appends function-specific parameters beyond `function` and `symbol`.
    fn add_extra_params(&self, _url: &mut Url) {}

    /// Appends this query's parameters to the given URL, returning the modified URL.
    fn add_to_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        url.query_pairs_mut()
            .append_pair("function", self.function().as_str())
            .append_pair("symbol", self.symbol());
        self.add_extra_params(&mut url);
        url
    }
}
