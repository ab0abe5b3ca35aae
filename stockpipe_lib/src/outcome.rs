//! Run accounting: per-obligation results folded into one outcome.

use std::fmt;

use serde::Serialize;

/// Terminal state of one obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObligationStatus {
    /// Data came back; `rows` is the count after filtering to missing dates.
    Fetched { rows: usize },
    Skipped { reason: String },
    Failed { reason: String, attempts: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObligationResult {
    pub ticker: String,
    /// Dates the obligation asked for.
    pub requested: usize,
    #[serde(flatten)]
    pub status: ObligationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Skipped,
    FetchFailed,
    WriteFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Skipped => write!(f, "skipped"),
            ErrorKind::FetchFailed => write!(f, "fetch failed"),
            ErrorKind::WriteFailed => write!(f, "write failed"),
        }
    }
}

/// A recorded problem. `scope` is a ticker, or a partition key for writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObligationError {
    pub scope: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub obligations: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub write_failures: usize,
    pub rows_written: usize,
    pub partitions_written: usize,
    pub errors: Vec<ObligationError>,
}

impl RunOutcome {
    pub fn record(&mut self, result: &ObligationResult) {
        self.obligations += 1;
        match &result.status {
            ObligationStatus::Fetched { .. } => self.success += 1,
            ObligationStatus::Skipped { reason } => {
                self.skipped += 1;
                self.push_error(&result.ticker, ErrorKind::Skipped, reason.clone());
            }
            ObligationStatus::Failed { reason, .. } => {
                self.failed += 1;
                self.push_error(&result.ticker, ErrorKind::FetchFailed, reason.clone());
            }
        }
    }

    pub fn record_write_failure(&mut self, key: &str, message: impl Into<String>) {
        self.write_failures += 1;
        self.push_error(key, ErrorKind::WriteFailed, message.into());
    }

    fn push_error(&mut self, scope: &str, kind: ErrorKind, message: String) {
        self.errors.push(ObligationError {
            scope: scope.to_string(),
            kind,
            message,
        });
    }

    /// Nothing to do counts as success. Obligations attempted with none
    /// succeeding is a failure. Skips alone do not make a run partial.
    pub fn status(&self) -> RunStatus {
        if self.obligations == 0 {
            RunStatus::Success
        } else if self.success == 0 {
            RunStatus::Failed
        } else if self.failed > 0 || self.write_failures > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Success
        }
    }

    /// One-line summary used for logs and notifications.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} obligations, {} succeeded, {} skipped, {} failed; {} rows in {} partitions ({} write failures)",
            self.status(),
            self.obligations,
            self.success,
            self.skipped,
            self.failed,
            self.rows_written,
            self.partitions_written,
            self.write_failures
        )
    }

    /// Summary followed by one line per recorded error, capped at `limit`.
    pub fn report(&self, limit: usize) -> String {
        let mut text = self.summary();
        for err in self.errors.iter().take(limit) {
            text.push_str(&format!("\n- {} [{}]: {}", err.scope, err.kind, err.message));
        }
        if self.errors.len() > limit {
            text.push_str(&format!("\n... and {} more", self.errors.len() - limit));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(ticker: &str, status: ObligationStatus) -> ObligationResult {
        ObligationResult {
            ticker: ticker.to_string(),
            requested: 1,
            status,
        }
    }

    #[test]
    fn no_obligations_is_success() {
        assert_eq!(RunOutcome::default().status(), RunStatus::Success);
    }

    #[test]
    fn skips_do_not_make_a_run_partial() {
        let mut outcome = RunOutcome::default();
        outcome.record(&result("AAA", ObligationStatus::Fetched { rows: 3 }));
        outcome.record(&result(
            "BBB",
            ObligationStatus::Skipped {
                reason: "rate limited".into(),
            },
        ));
        assert_eq!(outcome.status(), RunStatus::Success);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind, ErrorKind::Skipped);
    }

    #[test]
    fn failures_alongside_successes_are_partial() {
        let mut outcome = RunOutcome::default();
        outcome.record(&result("AAA", ObligationStatus::Fetched { rows: 3 }));
        outcome.record(&result(
            "ZZZ",
            ObligationStatus::Failed {
                reason: "503".into(),
                attempts: 3,
            },
        ));
        assert_eq!(outcome.status(), RunStatus::Partial);

        let mut writes = RunOutcome::default();
        writes.record(&result("AAA", ObligationStatus::Fetched { rows: 3 }));
        writes.record_write_failure("stock_prices/2024-01-02_stock_prices.csv", "denied");
        assert_eq!(writes.status(), RunStatus::Partial);
    }

    #[test]
    fn nothing_succeeding_is_failed() {
        let mut outcome = RunOutcome::default();
        outcome.record(&result(
            "AAA",
            ObligationStatus::Skipped {
                reason: "invalid symbol".into(),
            },
        ));
        assert_eq!(outcome.status(), RunStatus::Failed);
    }

    #[test]
    fn report_caps_error_lines() {
        let mut outcome = RunOutcome::default();
        for i in 0..5 {
            outcome.record_write_failure(&format!("k{}", i), "denied");
        }
        let report = outcome.report(2);
        assert!(report.contains("- k0 [write failed]: denied"));
        assert!(!report.contains("k2 ["));
        assert!(report.ends_with("... and 3 more"));
    }
}
