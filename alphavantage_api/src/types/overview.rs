use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::PayloadError;

/// Company fundamentals returned by `OVERVIEW`.
///
/// The endpoint returns a flat object of roughly fifty string fields whose
/// set changes over time, so they are kept as an ordered map. An unknown
/// symbol yields `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyOverview {
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl CompanyOverview {
    pub fn symbol(&self) -> Option<&str> {
        self.fields
            .get("Symbol")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Field rendered as flat text; strings are unquoted, null is empty.
    pub fn text(&self, field: &str) -> String {
        match self.fields.get(field) {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Rejects payloads that carry no `Symbol`, such as `{}` or a throttling note.
    pub fn validate(self) -> Result<Self, PayloadError> {
        if self.symbol().is_none() {
            return Err(PayloadError::MissingField { field: "Symbol" });
        }
        Ok(self)
    }
}
