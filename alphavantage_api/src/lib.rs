//! Thin async client for the Alpha Vantage query API.
//!
//! Covers the two endpoints the ingestion pipeline needs: full daily
//! adjusted price history and company overview. Payloads are deserialized
//! into typed records; deciding what an empty or throttled payload means is
//! left to the caller.

mod client;
mod errors;
mod query;
pub mod types;

pub use self::client::{Client, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use self::errors::{Error, PayloadError};
pub use self::query::{DailyAdjustedQuery, Function, OutputSize, OverviewQuery, Query};
