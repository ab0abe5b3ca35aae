//! Partition key scheme.
//!
//! by-date:   `<prefix>/<YYYY-MM-DD>_stock_prices.csv`, one blob per trading day
//! by-ticker: `<prefix>/ticker=<TICKER>/stock_prices.csv`, one blob per symbol

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::row::PriceRow;

pub const DEFAULT_PREFIX: &str = "stock_prices";
const FILE_SUFFIX: &str = "_stock_prices.csv";
const TICKER_FILE: &str = "stock_prices.csv";

fn date_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("static regex"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionScheme {
    #[default]
    ByDate,
    ByTicker,
}

impl fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByDate => write!(f, "by-date"),
            Self::ByTicker => write!(f, "by-ticker"),
        }
    }
}

impl FromStr for PartitionScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "by-date" | "date" => Ok(Self::ByDate),
            "by-ticker" | "ticker" => Ok(Self::ByTicker),
            other => Err(format!(
                "unknown partition scheme '{}'. Expected by-date or by-ticker",
                other
            )),
        }
    }
}

/// What a key says about its contents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PartitionKey {
    Date(NaiveDate),
    Ticker(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    prefix: String,
    scheme: PartitionScheme,
}

impl PartitionLayout {
    pub fn new(prefix: &str, scheme: PartitionScheme) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            scheme,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn scheme(&self) -> PartitionScheme {
        self.scheme
    }

    /// Listing prefix, with trailing slash.
    pub fn list_prefix(&self) -> String {
        crate::store::dir_prefix(&self.prefix)
    }

    pub fn key_for_date(&self, date: NaiveDate) -> String {
        format!("{}{}{}", self.list_prefix(), date.format("%Y-%m-%d"), FILE_SUFFIX)
    }

    pub fn key_for_ticker(&self, ticker: &str) -> String {
        format!("{}ticker={}/{}", self.list_prefix(), ticker, TICKER_FILE)
    }

    pub fn key_for(&self, partition: &PartitionKey) -> String {
        match partition {
            PartitionKey::Date(date) => self.key_for_date(*date),
            PartitionKey::Ticker(ticker) => self.key_for_ticker(ticker),
        }
    }

    /// Partition a row belongs to under this scheme.
    pub fn partition_of(&self, row: &PriceRow) -> PartitionKey {
        match self.scheme {
            PartitionScheme::ByDate => PartitionKey::Date(row.date),
            PartitionScheme::ByTicker => PartitionKey::Ticker(row.ticker.clone()),
        }
    }

    /// Interprets a listed key. Keys outside the prefix or without the
    /// scheme's marker yield `None`.
    pub fn parse_key(&self, key: &str) -> Option<PartitionKey> {
        let rest = key.strip_prefix(&self.list_prefix())?;
        match self.scheme {
            PartitionScheme::ByDate => parse_date_token(rest).map(PartitionKey::Date),
            PartitionScheme::ByTicker => {
                let segment = rest.split('/').next()?;
                let ticker = segment.strip_prefix("ticker=")?;
                if ticker.is_empty() || !rest.ends_with(".csv") {
                    return None;
                }
                Some(PartitionKey::Ticker(ticker.to_string()))
            }
        }
    }
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, PartitionScheme::ByDate)
    }
}

/// First `YYYY-MM-DD` token in `key` that is a real calendar date.
pub fn parse_date_token(key: &str) -> Option<NaiveDate> {
    date_token()
        .captures_iter(key)
        .filter_map(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok())
        .next()
}
