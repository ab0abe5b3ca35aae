use serde::Serialize;
use stockpipe_lib::coverage::{ScanStats, TickerCoverage};
use stockpipe_lib::overview::OverviewReport;
use stockpipe_lib::{BackfillPlan, FetchObligation, RunOutcome, RunStatus};
use tabled::{Table, Tabled};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

#[derive(Tabled, Serialize)]
struct ObligationRow {
    #[tabled(rename = "Ticker")]
    #[serde(rename = "Ticker")]
    ticker: String,
    #[tabled(rename = "Missing")]
    #[serde(rename = "Missing")]
    missing: usize,
    #[tabled(rename = "From")]
    #[serde(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    #[serde(rename = "To")]
    to: String,
}

#[derive(Tabled, Serialize)]
struct CoverageRow {
    #[tabled(rename = "Ticker")]
    #[serde(rename = "Ticker")]
    ticker: String,
    #[tabled(rename = "Days")]
    #[serde(rename = "Days")]
    days: usize,
    #[tabled(rename = "First")]
    #[serde(rename = "First")]
    first: String,
    #[tabled(rename = "Last")]
    #[serde(rename = "Last")]
    last: String,
}

#[derive(Tabled, Serialize)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled, Serialize)]
struct ErrorRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// JSON shape of a finished run: the counters plus the derived status.
#[derive(Serialize)]
struct OutcomeView<'a> {
    status: RunStatus,
    #[serde(flatten)]
    outcome: &'a RunOutcome,
}

// -- Row builders --

fn build_obligation_rows(obligations: &[FetchObligation]) -> Vec<ObligationRow> {
    obligations
        .iter()
        .map(|o| ObligationRow {
            ticker: o.ticker.clone(),
            missing: o.len(),
            from: o.start().map(|d| d.to_string()).unwrap_or_default(),
            to: o.end().map(|d| d.to_string()).unwrap_or_default(),
        })
        .collect()
}

fn build_coverage_rows(summaries: &[TickerCoverage]) -> Vec<CoverageRow> {
    summaries
        .iter()
        .map(|s| CoverageRow {
            ticker: s.ticker.clone(),
            days: s.days,
            first: s.first.to_string(),
            last: s.last.to_string(),
        })
        .collect()
}

fn build_outcome_rows(outcome: &RunOutcome) -> Vec<FieldRow> {
    let field = |field, value: usize| FieldRow {
        field,
        value: value.to_string(),
    };
    vec![
        FieldRow {
            field: "Status",
            value: outcome.status().to_string(),
        },
        field("Obligations", outcome.obligations),
        field("Succeeded", outcome.success),
        field("Skipped", outcome.skipped),
        field("Failed", outcome.failed),
        field("Rows written", outcome.rows_written),
        field("Partitions written", outcome.partitions_written),
        field("Write failures", outcome.write_failures),
    ]
}

fn build_error_rows(outcome: &RunOutcome) -> Vec<ErrorRow> {
    outcome
        .errors
        .iter()
        .map(|e| ErrorRow {
            scope: e.scope.clone(),
            kind: e.kind.to_string(),
            message: e.message.clone(),
        })
        .collect()
}

// -- Printers --

pub fn print_plan(plan: &BackfillPlan, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(plan),
        OutputFormat::Table => {
            eprintln!(
                "{} tickers, {} to {}: {} obligations, {} missing (ticker, date) pairs",
                plan.universe.len(),
                plan.range.start,
                plan.range.end,
                plan.obligations.len(),
                plan.missing_pairs()
            );
            if !plan.obligations.is_empty() {
                println!("{}", Table::new(build_obligation_rows(&plan.obligations)));
            }
        }
    }
}

pub fn print_coverage(summaries: &[TickerCoverage], stats: &ScanStats, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&build_coverage_rows(summaries)),
        OutputFormat::Table => {
            eprintln!(
                "{} keys listed, {} partitions read, {} skipped",
                stats.keys_listed, stats.partitions_read, stats.skipped
            );
            println!("{}", Table::new(build_coverage_rows(summaries)));
        }
    }
}

pub fn print_outcome(outcome: &RunOutcome, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&OutcomeView {
            status: outcome.status(),
            outcome,
        }),
        OutputFormat::Table => {
            println!("{}", Table::new(build_outcome_rows(outcome)));
            if !outcome.errors.is_empty() {
                println!("{}", Table::new(build_error_rows(outcome)));
            }
        }
    }
}

pub fn print_overview(report: &OverviewReport, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            if report.already_current > 0 {
                eprintln!(
                    "{} tickers already retrieved today",
                    report.already_current
                );
            }
            print_outcome(&report.outcome, format);
        }
    }
}

pub fn print_json<T: Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize to JSON: {}", e),
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
