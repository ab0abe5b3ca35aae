//! HTTP client for the Alpha Vantage query API.

use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    query::{DailyAdjustedQuery, OverviewQuery, Query},
    types::{CompanyOverview, DailyAdjustedResponse},
    Error,
};

/// Production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

/// Total request timeout (connect + transfer). Full-history payloads are large.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for the Alpha Vantage query API.
///
/// Holds one pooled `reqwest::Client`; cloning is cheap and clones share the
/// connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    /// Base URL for the API. Defaults to `https://www.alphavantage.co`.
    base_api_url: String,
    api_key: String,
}

impl Client {
    /// Creates a new client pointing at the production API.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_options(DEFAULT_BASE_URL, api_key, DEFAULT_TIMEOUT)
    }

    /// Creates a new client with a custom base URL. Used for testing with wiremock.
    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_options(base_url, api_key, DEFAULT_TIMEOUT)
    }

    /// Creates a new client with a custom base URL and total request timeout.
    pub fn with_options(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                tracing::error!("Failed to build HTTP client: {}", e);
                Error::RequestFailed(e.to_string())
            })?;
        Ok(Self {
            http,
            base_api_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_api_url
    }

    fn get_url(&self, query: &impl Query) -> Result<Url, Error> {
        let url = Url::parse(format!("{}/query", &self.base_api_url).as_str()).map_err(|e| {
            tracing::error!("Invalid URL constructed: {}", e);
            Error::RequestFailed(format!("invalid base url: {}", e))
        })?;
        let mut url = query.add_to_url(&url);
        url.query_pairs_mut().append_pair("apikey", &self.api_key);
        Ok(url)
    }

    async fn get<T, Q>(&self, query: &Q) -> Result<T, Error>
    where
        T: DeserializeOwned,
        Q: Query,
    {
        let url = self.get_url(query)?;
        let resp = self
            .http
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(symbol = query.symbol(), "Failed to get resource: {}", e);
                Error::from_reqwest(e)
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            tracing::debug!(symbol = query.symbol(), "Failed to read response body: {}", e);
            Error::from_reqwest(e)
        })?;

        if status != reqwest::StatusCode::OK {
            let snippet = truncate_body(&body);
            tracing::debug!(
                symbol = query.symbol(),
                "Request failed with status {}: {}",
                status,
                snippet
            );
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: snippet,
            });
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let snippet = truncate_body(&body);
            tracing::debug!(
                symbol = query.symbol(),
                "Failed to parse resource: {} | body: {}",
                e,
                snippet
            );
            Error::InvalidBody(format!("{}: {}", e, snippet))
        })
    }

    /// Fetches the daily adjusted series for one symbol.
    ///
    /// A 200 response without a series is returned as-is; use
    /// [`DailyAdjustedResponse::into_series`] to classify it.
    pub async fn get_daily_adjusted(
        &self,
        query: &DailyAdjustedQuery,
    ) -> Result<DailyAdjustedResponse, Error> {
        self.get::<DailyAdjustedResponse, DailyAdjustedQuery>(query)
            .await
    }

    /// Fetches company fundamentals for one symbol.
    pub async fn get_overview(&self, query: &OverviewQuery) -> Result<CompanyOverview, Error> {
        self.get::<CompanyOverview, OverviewQuery>(query).await
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...[truncated]", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_function_symbol_and_key() {
        let client = Client::with_base_url("http://localhost:1234/", "secret").unwrap();
        let url = client.get_url(&DailyAdjustedQuery::new("IBM")).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(url.path(), "/query");
        assert!(pairs.contains(&("function".into(), "TIME_SERIES_DAILY_ADJUSTED".into())));
        assert!(pairs.contains(&("symbol".into(), "IBM".into())));
        assert!(pairs.contains(&("outputsize".into(), "full".into())));
        assert!(pairs.contains(&("apikey".into(), "secret".into())));
    }

    #[test]
    fn overview_url_has_no_output_size() {
        let client = Client::with_base_url("http://localhost:1234", "k").unwrap();
        let url = client.get_url(&OverviewQuery::new("MSFT")).unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "function" && v == "OVERVIEW"));
        assert!(!url.query_pairs().any(|(k, _)| k == "outputsize"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(400);
        let out = truncate_body(&body);
        assert!(out.ends_with("...[truncated]"));
    }
}
