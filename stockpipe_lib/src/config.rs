//! Pipeline configuration.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! environment variables. Command-line flags are applied by the binary on
//! the resulting [`PipelineConfig`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::aws::AwsSettings;
use crate::coverage::CoverageOptions;
use crate::error::ConfigError;
use crate::layout::{PartitionLayout, PartitionScheme, DEFAULT_PREFIX};
use crate::orchestrator::DEFAULT_CONCURRENCY;
use crate::overview::{DEFAULT_OVERVIEW_CONCURRENCY, DEFAULT_OVERVIEW_PREFIX};
use crate::rate_limiter::DEFAULT_CALLS_PER_MINUTE;
use crate::retry::{Backoff, RetryPolicy};
use crate::tickers::{TickerSource, DEFAULT_BOOTSTRAP_TICKER, DEFAULT_DISCOVERY_KEYS};
use crate::transform::DEFAULT_BIN;
use crate::validation::{validate_date, validate_ticker_list};

pub const API_KEY_ENV: &str = "ALPHAVANTAGE_API_KEY";
const DEFAULT_FALLBACK_START: (i32, u32, u32) = (2020, 1, 1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    S3 { bucket: String },
    Local { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub concurrency: usize,
    /// Delay after each completed request, while its slot is still held.
    pub pacing: Duration,
    /// Budget for the sliding-window limiter; `None` disables it.
    pub calls_per_minute: Option<u64>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSettings {
    /// Explicit first date; otherwise derived from coverage.
    pub start_date: Option<NaiveDate>,
    /// Used when the store has no coverage for the universe.
    pub fallback_start: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSettings {
    pub bin: String,
    pub project_dir: Option<PathBuf>,
    pub profiles_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewSettings {
    pub prefix: String,
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub api: ApiSettings,
    pub storage: Option<StorageBackend>,
    pub aws: AwsSettings,
    pub prefix: String,
    pub scheme: PartitionScheme,
    pub fetch: FetchSettings,
    pub coverage: CoverageOptions,
    pub range: RangeSettings,
    pub tickers: TickerSource,
    pub sns_topic_arn: Option<String>,
    pub transform: TransformSettings,
    pub overview: OverviewSettings,
    /// Abort the run on the first partition write failure.
    pub fail_fast_writes: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let (y, m, d) = DEFAULT_FALLBACK_START;
        Self {
            api: ApiSettings {
                api_key: None,
                base_url: alphavantage_api::DEFAULT_BASE_URL.to_string(),
                timeout: alphavantage_api::DEFAULT_TIMEOUT,
            },
            storage: None,
            aws: AwsSettings::default(),
            prefix: DEFAULT_PREFIX.to_string(),
            scheme: PartitionScheme::ByDate,
            fetch: FetchSettings {
                concurrency: DEFAULT_CONCURRENCY,
                pacing: pacing_for(DEFAULT_CALLS_PER_MINUTE),
                calls_per_minute: Some(DEFAULT_CALLS_PER_MINUTE),
                retry: RetryPolicy::default(),
            },
            coverage: CoverageOptions::default(),
            range: RangeSettings {
                start_date: None,
                fallback_start: NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default(),
            },
            tickers: TickerSource::default(),
            sns_topic_arn: None,
            transform: TransformSettings {
                bin: DEFAULT_BIN.to_string(),
                project_dir: None,
                profiles_dir: home_dir().join(".dbt"),
            },
            overview: OverviewSettings {
                prefix: DEFAULT_OVERVIEW_PREFIX.to_string(),
                concurrency: DEFAULT_OVERVIEW_CONCURRENCY,
            },
            fail_fast_writes: false,
        }
    }
}

/// Spacing that keeps one request stream under `calls_per_minute`.
pub fn pacing_for(calls_per_minute: u64) -> Duration {
    let calls = u32::try_from(calls_per_minute.max(1)).unwrap_or(u32::MAX);
    Duration::from_secs(60) / calls
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

// -- TOML file shape --

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api: FileApi,
    pub storage: FileStorage,
    pub fetch: FileFetch,
    pub coverage: Option<CoverageOptions>,
    pub range: FileRange,
    pub tickers: Option<TickerSource>,
    pub notify: FileNotify,
    pub transform: FileTransform,
    pub overview: FileOverview,
    pub fail_fast_writes: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileApi {
    pub key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileStorage {
    pub bucket: Option<String>,
    pub root: Option<PathBuf>,
    pub prefix: Option<String>,
    pub layout: Option<PartitionScheme>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileFetch {
    pub concurrency: Option<usize>,
    pub calls_per_minute: Option<u64>,
    pub pacing_ms: Option<u64>,
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileRange {
    pub start_date: Option<NaiveDate>,
    pub fallback_start: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileNotify {
    pub topic_arn: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileTransform {
    pub bin: Option<String>,
    pub project_dir: Option<PathBuf>,
    pub profiles_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileOverview {
    pub prefix: Option<String>,
    pub concurrency: Option<usize>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::MissingFile(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::parse(&text)
    }
}

fn env_parse<T: FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            ConfigError::InvalidInput(format!("{} has invalid value '{}'", key, raw))
        }),
    }
}

fn env_string(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl PipelineConfig {
    /// Loads from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.map(FileConfig::read).transpose()?;
        Self::from_sources(file.unwrap_or_default(), &|key| std::env::var(key).ok())
    }

    /// Applies a parsed file then the `env` lookup over the defaults.
    pub fn from_sources(
        file: FileConfig,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_file(file);
        cfg.apply_env(env)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: FileConfig) {
        let FileConfig {
            api,
            storage,
            fetch,
            coverage,
            range,
            tickers,
            notify,
            transform,
            overview,
            fail_fast_writes,
        } = file;

        self.api.api_key = api.key.or(self.api.api_key.take());
        if let Some(url) = api.base_url {
            self.api.base_url = url;
        }
        if let Some(secs) = api.timeout_secs {
            self.api.timeout = Duration::from_secs(secs);
        }

        if let Some(root) = storage.root {
            self.storage = Some(StorageBackend::Local { root });
        } else if let Some(bucket) = storage.bucket {
            self.storage = Some(StorageBackend::S3 { bucket });
        }
        if let Some(prefix) = storage.prefix {
            self.prefix = prefix;
        }
        if let Some(layout) = storage.layout {
            self.scheme = layout;
        }
        if let Some(region) = storage.region {
            self.aws.region = region;
        }
        self.aws.endpoint_url = storage.endpoint_url.or(self.aws.endpoint_url.take());

        if let Some(n) = fetch.concurrency {
            self.fetch.concurrency = n;
        }
        if let Some(cpm) = fetch.calls_per_minute {
            self.set_calls_per_minute(cpm);
        }
        if let Some(ms) = fetch.pacing_ms {
            self.fetch.pacing = Duration::from_millis(ms);
        }
        if let Some(retry) = fetch.retry {
            self.fetch.retry = retry;
        }

        if let Some(coverage) = coverage {
            self.coverage = coverage;
        }
        self.range.start_date = range.start_date.or(self.range.start_date);
        if let Some(fallback) = range.fallback_start {
            self.range.fallback_start = fallback;
        }
        if let Some(tickers) = tickers {
            self.tickers = tickers;
        }
        self.sns_topic_arn = notify.topic_arn.or(self.sns_topic_arn.take());
        if let Some(bin) = transform.bin {
            self.transform.bin = bin;
        }
        self.transform.project_dir = transform.project_dir.or(self.transform.project_dir.take());
        if let Some(dir) = transform.profiles_dir {
            self.transform.profiles_dir = dir;
        }
        if let Some(prefix) = overview.prefix {
            self.overview.prefix = prefix;
        }
        if let Some(n) = overview.concurrency {
            self.overview.concurrency = n;
        }
        if let Some(flag) = fail_fast_writes {
            self.fail_fast_writes = flag;
        }
    }

    fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(key) = env_string(env, API_KEY_ENV) {
            self.api.api_key = Some(key);
        }
        if let Some(url) = env_string(env, "ALPHAVANTAGE_BASE_URL") {
            self.api.base_url = url;
        }

        if let Some(root) = env_string(env, "STOCKPIPE_STORAGE_DIR") {
            self.storage = Some(StorageBackend::Local { root: root.into() });
        } else if let Some(bucket) = env_string(env, "S3_BUCKET_NAME") {
            self.storage = Some(StorageBackend::S3 { bucket });
        }
        if let Some(region) = env_string(env, "AWS_REGION") {
            self.aws.region = region;
        }
        if let Some(id) = env_string(env, "AWS_ACCESS_KEY_ID") {
            self.aws.access_key_id = Some(id);
        }
        if let Some(secret) = env_string(env, "AWS_SECRET_ACCESS_KEY") {
            self.aws.secret_access_key = Some(secret);
        }
        if let Some(endpoint) = env_string(env, "S3_ENDPOINT_URL") {
            self.aws.endpoint_url = Some(endpoint);
        }
        if let Some(prefix) = env_string(env, "STOCKPIPE_PREFIX") {
            self.prefix = prefix;
        }
        if let Some(raw) = env_string(env, "STOCKPIPE_LAYOUT") {
            self.scheme = raw.parse().map_err(ConfigError::InvalidInput)?;
        }

        if let Some(n) = env_parse(env, "STOCKPIPE_CONCURRENCY")? {
            self.fetch.concurrency = n;
        }
        if let Some(cpm) = env_parse(env, "STOCKPIPE_CALLS_PER_MINUTE")? {
            self.set_calls_per_minute(cpm);
        }
        let retry_max: Option<usize> = env_parse(env, "STOCKPIPE_RETRY_MAX")?;
        let retry_wait: Option<u64> = env_parse(env, "STOCKPIPE_RETRY_WAIT_MS")?;
        if let Some(n) = retry_max {
            self.fetch.retry.max_attempts = n;
        }
        if let Some(ms) = retry_wait {
            self.fetch.retry.backoff = Backoff::Fixed { delay_ms: ms };
        }

        if let Some(raw) = env_string(env, "STOCKPIPE_START_DATE") {
            self.range.start_date = Some(validate_date(&raw)?);
        }
        if let Some(path) = env_string(env, "STOCKPIPE_TICKER_FILE") {
            self.tickers = TickerSource::File { path: path.into() };
        } else if let Some(list) = env_string(env, "STOCKPIPE_TICKERS") {
            self.tickers = TickerSource::List {
                tickers: validate_ticker_list(&list)?,
            };
        }

        if let Some(topic) =
            env_string(env, "DAGSTER_SNS_TOPIC_ARN").or_else(|| env_string(env, "SNS_TOPIC_ARN"))
        {
            self.sns_topic_arn = Some(topic);
        }
        if let Some(bin) = env_string(env, "DBT_BIN") {
            self.transform.bin = bin;
        }
        if let Some(dir) = env_string(env, "DBT_PROJECT_DIR") {
            self.transform.project_dir = Some(dir.into());
        }
        if let Some(dir) = env_string(env, "DBT_PROFILES_DIR") {
            self.transform.profiles_dir = dir.into();
        }
        Ok(())
    }

    /// Sets the limiter budget and the matching per-request pacing.
    pub fn set_calls_per_minute(&mut self, calls: u64) {
        if calls == 0 {
            self.fetch.calls_per_minute = None;
            self.fetch.pacing = Duration::ZERO;
        } else {
            self.fetch.calls_per_minute = Some(calls);
            self.fetch.pacing = pacing_for(calls);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.concurrency == 0 {
            return Err(ConfigError::InvalidInput(
                "fetch concurrency must be at least 1".to_string(),
            ));
        }
        if self.fetch.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidInput(
                "retry max attempts must be at least 1".to_string(),
            ));
        }
        if self.overview.concurrency == 0 {
            return Err(ConfigError::InvalidInput(
                "overview concurrency must be at least 1".to_string(),
            ));
        }
        if self.coverage.sample_rows == 0 || self.coverage.sample_bytes == 0 {
            return Err(ConfigError::InvalidInput(
                "coverage sample bounds must be non-zero".to_string(),
            ));
        }
        if let TickerSource::Discover { sample_keys: 0, .. } = self.tickers {
            return Err(ConfigError::InvalidInput(
                "ticker discovery needs at least one sample key".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingEnv(API_KEY_ENV))
    }

    pub fn require_storage(&self) -> Result<&StorageBackend, ConfigError> {
        self.storage
            .as_ref()
            .ok_or(ConfigError::MissingEnv("S3_BUCKET_NAME"))
    }

    pub fn layout(&self) -> PartitionLayout {
        PartitionLayout::new(&self.prefix, self.scheme)
    }
}
