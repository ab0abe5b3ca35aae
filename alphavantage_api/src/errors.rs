//! Error types for the API client.

/// Errors that can occur when making API requests.
///
/// Every variant describes a transport-level or protocol-level failure.
/// Callers treat them as retryable.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request could not be sent or the response could not be read.
    #[error("Request failed: {0}")]
    RequestFailed(String),
    /// The request exceeded the client's total timeout.
    #[error("Request timed out")]
    Timeout,
    /// The API returned a status other than 200, with a body snippet.
    #[error("Request failed with status {status}")]
    HttpStatus { status: u16, body: String },
    /// The API returned 200 but the body was not the expected JSON shape.
    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

impl Error {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            // Strip the URL: it carries the API key as a query parameter.
            Error::RequestFailed(err.without_url().to_string())
        }
    }
}

/// A well-formed response that lacks the data the caller asked for.
///
/// Alpha Vantage answers throttled calls, unknown symbols and bad keys with
/// HTTP 200 and a message object instead of the series.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("response has no \"{key}\" section: {reason}")]
    MissingSeries { key: &'static str, reason: String },
    #[error("response has no \"{field}\" field")]
    MissingField { field: &'static str },
}
