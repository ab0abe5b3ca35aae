//! Ticker universe: which symbols a run is responsible for.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::columns::{read_column, ColumnError};
use crate::coverage::{discover_tickers, CoverageOptions};
use crate::error::{ConfigError, PipelineError};
use crate::layout::PartitionLayout;
use crate::store::BlobStore;

pub const DEFAULT_CONSTITUENTS_URL: &str =
    "https://datahub.io/core/s-and-p-500-companies/r/constituents.csv";
pub const DEFAULT_BOOTSTRAP_TICKER: &str = "AAPL";
pub const DEFAULT_DISCOVERY_KEYS: usize = 5;

const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickerSource {
    /// Local CSV with a `ticker` column.
    File { path: PathBuf },
    /// Remote constituents CSV with a `Symbol` column.
    Remote { url: String },
    /// Tickers already present in the store, or `bootstrap` if it is empty.
    Discover { sample_keys: usize, bootstrap: String },
    /// Explicit list, e.g. from `--tickers`.
    List { tickers: Vec<String> },
}

impl Default for TickerSource {
    fn default() -> Self {
        TickerSource::Discover {
            sample_keys: DEFAULT_DISCOVERY_KEYS,
            bootstrap: DEFAULT_BOOTSTRAP_TICKER.to_string(),
        }
    }
}

impl TickerSource {
    pub fn describe(&self) -> String {
        match self {
            TickerSource::File { path } => format!("file {}", path.display()),
            TickerSource::Remote { url } => format!("remote {}", url),
            TickerSource::Discover { sample_keys, .. } => {
                format!("discovery from first {} partitions", sample_keys)
            }
            TickerSource::List { tickers } => format!("list of {}", tickers.len()),
        }
    }
}

/// Trimmed, uppercased, de-duplicated and sorted. Blank values and stray
/// header cells (`TICKER`, `SYMBOL`) are dropped.
pub fn normalize_tickers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|t| t.as_ref().trim().to_uppercase())
        .filter(|t| !t.is_empty() && t != "TICKER" && t != "SYMBOL")
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Reads `column` from CSV bytes into a normalized ticker list.
pub fn parse_ticker_csv(
    bytes: &[u8],
    column: &str,
    source_name: &str,
) -> Result<Vec<String>, ConfigError> {
    let values = read_column(bytes, column, None).map_err(|e| match e {
        ColumnError::Missing(column) => ConfigError::MissingColumn {
            column,
            source_name: source_name.to_string(),
        },
        ColumnError::Csv(e) => ConfigError::Csv(e),
    })?;
    Ok(normalize_tickers(values))
}

pub async fn load_ticker_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::MissingFile(path.to_path_buf())
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    parse_ticker_csv(&bytes, "ticker", &path.display().to_string())
}

pub async fn fetch_constituents(url: &str) -> Result<Vec<String>, PipelineError> {
    let http = reqwest::Client::builder()
        .timeout(REMOTE_TIMEOUT)
        .build()
        .map_err(|e| PipelineError::Universe(e.to_string()))?;
    let resp = http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PipelineError::Universe(format!("GET {}: {}", url, e)))?;
    let body = resp
        .bytes()
        .await
        .map_err(|e| PipelineError::Universe(format!("reading {}: {}", url, e)))?;
    Ok(parse_ticker_csv(&body, "Symbol", url)?)
}

/// Resolves the universe for this run. Never returns an empty list without
/// an error, except for an explicitly empty `List`.
pub async fn resolve_universe(
    source: &TickerSource,
    store: &dyn BlobStore,
    layout: &PartitionLayout,
    options: CoverageOptions,
) -> Result<Vec<String>, PipelineError> {
    let tickers = match source {
        TickerSource::File { path } => load_ticker_file(path).await?,
        TickerSource::Remote { url } => fetch_constituents(url).await?,
        TickerSource::List { tickers } => normalize_tickers(tickers),
        TickerSource::Discover {
            sample_keys,
            bootstrap,
        } => {
            let found = discover_tickers(store, layout, *sample_keys, options).await?;
            if found.is_empty() {
                tracing::warn!("No existing ticker data found, using bootstrap ticker {}", bootstrap);
                normalize_tickers([bootstrap])
            } else {
                found
            }
        }
    };
    tracing::info!(count = tickers.len(), source = %source.describe(), "Ticker universe resolved");
    Ok(tickers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn normalization_cleans_input() {
        let tickers = normalize_tickers([" msft", "AAPL", "", "ticker", "aapl ", "BRK.B"]);
        assert_eq!(tickers, vec!["AAPL", "BRK.B", "MSFT"]);
    }

    #[test]
    fn header_is_matched_loosely() {
        let csv = "\u{feff} Ticker ,name\nibm,IBM\nmsft,Microsoft\n";
        assert_eq!(
            parse_ticker_csv(csv.as_bytes(), "ticker", "t.csv").unwrap(),
            vec!["IBM", "MSFT"]
        );
    }

    #[test]
    fn missing_column_is_a_config_error() {
        let err = parse_ticker_csv(b"symbol\nIBM\n", "ticker", "t.csv").unwrap_err();
        assert!(matches!(err, ConfigError::MissingColumn { ref column, .. } if column == "ticker"));
    }

    #[tokio::test]
    async fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_ticker_file(&dir.path().join("absent.csv")).await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }

    #[tokio::test]
    async fn file_source_reads_csv() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tickers.csv");
        std::fs::write(&file, "ticker\nxom\nTICKER\ncvx\n").unwrap();
        let store = MemoryStore::new();
        let tickers = resolve_universe(
            &TickerSource::File { path: file },
            &store,
            &PartitionLayout::default(),
            CoverageOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(tickers, vec!["CVX", "XOM"]);
    }

    #[tokio::test]
    async fn remote_source_reads_symbol_column() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/constituents.csv"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("Symbol,Security\nMMM,3M\naos,A. O. Smith\n"),
            )
            .mount(&server)
            .await;

        let tickers = fetch_constituents(&format!("{}/constituents.csv", server.uri()))
            .await
            .unwrap();
        assert_eq!(tickers, vec!["AOS", "MMM"]);
    }

    #[tokio::test]
    async fn remote_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let err = fetch_constituents(&format!("{}/x.csv", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Universe(_)));
    }

    #[tokio::test]
    async fn discovery_falls_back_to_bootstrap() {
        let store = MemoryStore::new();
        let tickers = resolve_universe(
            &TickerSource::default(),
            &store,
            &PartitionLayout::default(),
            CoverageOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(tickers, vec!["AAPL"]);
    }
}
