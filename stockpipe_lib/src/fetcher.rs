//! One-symbol price fetch with retry and outcome classification.

use std::sync::Arc;

use alphavantage_api::{Client, DailyAdjustedQuery};
use async_trait::async_trait;
use thiserror::Error;

use crate::normalize::normalize;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::row::PriceRow;
use crate::validation::validate_ticker;

/// A completed request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Normalized rows for the whole returned history.
    Rows(Vec<PriceRow>),
    /// Well-formed response without usable data. Not retried.
    Empty { reason: String },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid ticker '{ticker}': {reason}")]
    InvalidTicker { ticker: String, reason: String },
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: alphavantage_api::Error,
    },
}

impl FetchError {
    pub fn attempts(&self) -> usize {
        match self {
            FetchError::InvalidTicker { .. } => 0,
            FetchError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Where price history comes from. The orchestrator only sees this seam.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self, ticker: &str) -> Result<FetchOutcome, FetchError>;
}

/// [`PriceSource`] backed by the Alpha Vantage daily adjusted endpoint.
#[derive(Clone)]
pub struct PriceFetcher {
    client: Client,
    retry: RetryPolicy,
    limiter: Option<Arc<RateLimiter>>,
}

impl PriceFetcher {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            limiter: None,
        }
    }

    /// Every attempt, retries included, waits on `limiter` first.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }
}

#[async_trait]
impl PriceSource for PriceFetcher {
    async fn fetch(&self, ticker: &str) -> Result<FetchOutcome, FetchError> {
        let ticker = validate_ticker(ticker).map_err(|e| FetchError::InvalidTicker {
            ticker: ticker.to_string(),
            reason: e.to_string(),
        })?;
        let query = DailyAdjustedQuery::new(ticker.as_str());
        let label = format!("{} price fetch", ticker);

        let query = &query;
        let symbol = ticker.as_str();
        let response = self
            .retry
            .retry_async(
                &label,
                |_| true,
                move |attempt| {
                    async move {
                        if let Some(limiter) = &self.limiter {
                            limiter.acquire().await;
                        }
                        tracing::debug!(ticker = symbol, attempt, "Requesting daily series");
                        let result = self.client.get_daily_adjusted(query).await;
                        if result.is_err() {
                            if let Some(limiter) = &self.limiter {
                                limiter.tracker().record_failure();
                            }
                        }
                        result
                    }
                },
            )
            .await
            .map_err(|failure| FetchError::Exhausted {
                attempts: failure.attempts,
                source: failure.error,
            })?;

        let tracker = self.limiter.as_ref().map(|l| l.tracker());
        match response.into_series() {
            Ok(series) => {
                if let Some(t) = tracker {
                    t.record_data();
                }
                let rows = normalize(&ticker, &series);
                if rows.is_empty() {
                    Ok(FetchOutcome::Empty {
                        reason: "time series contained no dated entries".to_string(),
                    })
                } else {
                    Ok(FetchOutcome::Rows(rows))
                }
            }
            Err(payload) => {
                if let Some(t) = tracker {
                    t.record_empty();
                }
                Ok(FetchOutcome::Empty {
                    reason: payload.to_string(),
                })
            }
        }
    }
}
