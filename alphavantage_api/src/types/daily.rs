use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::PayloadError;

/// Top-level key holding the date-indexed series.
pub const TIME_SERIES_KEY: &str = "Time Series (Daily)";

/// The eight numbered field labels of a daily adjusted bar, in upstream order.
pub const FIELD_LABELS: [&str; 8] = [
    "1. open",
    "2. high",
    "3. low",
    "4. close",
    "5. adjusted close",
    "6. volume",
    "7. dividend amount",
    "8. split coefficient",
];

/// Date string (`YYYY-MM-DD`) to bar.
pub type TimeSeries = BTreeMap<String, DailyBar>;

/// Response of `TIME_SERIES_DAILY_ADJUSTED`.
///
/// On success only `meta_data` and `time_series` are present. Throttled or
/// rejected calls come back as 200 with one of the message fields instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyAdjustedResponse {
    #[serde(rename = "Meta Data", default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<MetaData>,
    #[serde(rename = "Time Series (Daily)", default, skip_serializing_if = "Option::is_none")]
    pub time_series: Option<TimeSeries>,
    #[serde(rename = "Note", default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(rename = "Information", default, skip_serializing_if = "Option::is_none")]
    pub information: Option<String>,
    #[serde(rename = "Error Message", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DailyAdjustedResponse {
    /// Upstream explanation for a missing series, if one was given.
    pub fn message(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .or(self.note.as_deref())
            .or(self.information.as_deref())
    }

    /// Validates the payload shape and returns the series.
    pub fn into_series(self) -> Result<TimeSeries, PayloadError> {
        let reason = self
            .message()
            .unwrap_or("no time series returned")
            .to_string();
        self.time_series.ok_or(PayloadError::MissingSeries {
            key: TIME_SERIES_KEY,
            reason,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaData {
    #[serde(rename = "1. Information", default)]
    pub information: Option<String>,
    #[serde(rename = "2. Symbol", default)]
    pub symbol: Option<String>,
    #[serde(rename = "3. Last Refreshed", default)]
    pub last_refreshed: Option<String>,
    #[serde(rename = "4. Output Size", default)]
    pub output_size: Option<String>,
    #[serde(rename = "5. Time Zone", default)]
    pub time_zone: Option<String>,
}

/// One day of adjusted prices, exactly as sent.
///
/// Values stay textual here. Coercion to numbers (with invalid values
/// becoming null) belongs to the consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    #[serde(rename = "1. open", default, deserialize_with = "text_or_number")]
    pub open: Option<String>,
    #[serde(rename = "2. high", default, deserialize_with = "text_or_number")]
    pub high: Option<String>,
    #[serde(rename = "3. low", default, deserialize_with = "text_or_number")]
    pub low: Option<String>,
    #[serde(rename = "4. close", default, deserialize_with = "text_or_number")]
    pub close: Option<String>,
    #[serde(rename = "5. adjusted close", default, deserialize_with = "text_or_number")]
    pub adjusted_close: Option<String>,
    #[serde(rename = "6. volume", default, deserialize_with = "text_or_number")]
    pub volume: Option<String>,
    #[serde(rename = "7. dividend amount", default, deserialize_with = "text_or_number")]
    pub dividend_amount: Option<String>,
    #[serde(rename = "8. split coefficient", default, deserialize_with = "text_or_number")]
    pub split_coefficient: Option<String>,
}

impl DailyBar {
    /// Looks a value up by its numbered upstream label.
    pub fn get(&self, label: &str) -> Option<&str> {
        let value = match label {
            "1. open" => &self.open,
            "2. high" => &self.high,
            "3. low" => &self.low,
            "4. close" => &self.close,
            "5. adjusted close" => &self.adjusted_close,
            "6. volume" => &self.volume,
            "7. dividend amount" => &self.dividend_amount,
            "8. split coefficient" => &self.split_coefficient,
            _ => return None,
        };
        value.as_deref()
    }
}

/// Accepts a JSON string, number, or null and keeps it as text.
fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_accepts_numbers_and_strings() {
        let json = r#"{"1. open": "10.5", "2. high": 11, "6. volume": null}"#;
        let bar: DailyBar = serde_json::from_str(json).unwrap();
        assert_eq!(bar.open.as_deref(), Some("10.5"));
        assert_eq!(bar.high.as_deref(), Some("11"));
        assert_eq!(bar.volume, None);
        assert_eq!(bar.close, None);
    }

    #[test]
    fn lookup_by_label_covers_all_fields() {
        let bar = DailyBar {
            open: Some("1".into()),
            high: Some("2".into()),
            low: Some("3".into()),
            close: Some("4".into()),
            adjusted_close: Some("5".into()),
            volume: Some("6".into()),
            dividend_amount: Some("7".into()),
            split_coefficient: Some("8".into()),
        };
        for (i, label) in FIELD_LABELS.iter().enumerate() {
            assert_eq!(bar.get(label), Some((i + 1).to_string().as_str()));
        }
        assert_eq!(bar.get("9. unknown"), None);
    }

    #[test]
    fn missing_series_reports_upstream_note() {
        let resp: DailyAdjustedResponse = serde_json::from_str(
            r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#,
        )
        .unwrap();
        let err = resp.into_series().unwrap_err();
        match err {
            PayloadError::MissingSeries { key, reason } => {
                assert_eq!(key, TIME_SERIES_KEY);
                assert!(reason.contains("call frequency"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_message_takes_precedence() {
        let resp = DailyAdjustedResponse {
            error_message: Some("Invalid API call".into()),
            information: Some("premium endpoint".into()),
            ..Default::default()
        };
        assert_eq!(resp.message(), Some("Invalid API call"));
    }
}
