//! Run-level error types.
//!
//! Obligation-scoped failures (`FetchError`, `WriteError`) live next to the
//! component that produces them and are folded into a `RunOutcome`. Only the
//! errors here abort a run.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Configuration problems detected before any network activity starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing {0} environment variable")]
    MissingEnv(&'static str),
    #[error("Reference file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("Required column '{column}' not found in {source_name}")]
    MissingColumn {
        column: String,
        source_name: String,
    },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors that end a run and are reported to the invoking scheduler.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("API client error: {0}")]
    Api(#[from] alphavantage_api::Error),
    #[error("Ticker universe unavailable: {0}")]
    Universe(String),
    #[error("No data returned: 0 of {attempted} obligations succeeded")]
    NoData { attempted: usize },
    #[error("Aborted after write failure: {0}")]
    WriteAborted(#[from] crate::partition::WriteError),
}
