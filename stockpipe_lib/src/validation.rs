use chrono::NaiveDate;

use crate::error::ConfigError;

/// Longest symbol accepted. Real listings stay well under this.
pub const MAX_TICKER_LENGTH: usize = 12;

/// Validate a ticker symbol: trimmed, uppercased, ASCII alphanumeric plus `.` and `-`.
pub fn validate_ticker(input: &str) -> Result<String, ConfigError> {
    let upper = input.trim().to_uppercase();
    if upper.is_empty() {
        return Err(ConfigError::InvalidInput("ticker is empty".to_string()));
    }
    if upper.len() > MAX_TICKER_LENGTH {
        return Err(ConfigError::InvalidInput(format!(
            "ticker '{}' exceeds maximum length of {} characters",
            input.trim(),
            MAX_TICKER_LENGTH
        )));
    }
    if !upper
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidInput(format!(
            "invalid ticker '{}'. Allowed characters: A-Z, 0-9, '.', '-'",
            input.trim()
        )));
    }
    Ok(upper)
}

/// Validate a comma-separated ticker list, e.g. from `--tickers AAPL,MSFT`.
pub fn validate_ticker_list(input: &str) -> Result<Vec<String>, ConfigError> {
    let tickers = input
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(validate_ticker)
        .collect::<Result<Vec<_>, _>>()?;
    if tickers.is_empty() {
        return Err(ConfigError::InvalidInput("ticker list is empty".to_string()));
    }
    Ok(tickers)
}

/// Validate a YYYY-MM-DD date string.
pub fn validate_date(input: &str) -> Result<NaiveDate, ConfigError> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| {
        ConfigError::InvalidInput(format!(
            "invalid date '{}'. Expected format: YYYY-MM-DD (e.g., 2024-06-01)",
            trimmed
        ))
    })
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;
