//! Runs fetch obligations concurrently under an admission gate.
//!
//! Each obligation is its own task. Tasks report through an mpsc channel to
//! the single consumer in [`FetchOrchestrator::run_with_progress`], which is
//! the only place results are merged.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::fetcher::{FetchOutcome, PriceSource};
use crate::gaps::FetchObligation;
use crate::normalize::filter_to;
use crate::outcome::{ObligationResult, ObligationStatus, RunOutcome};
use crate::row::PriceRow;

/// 60 s / 110 calls.
pub const DEFAULT_PACING: Duration = Duration::from_micros(545_455);
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Rows from successful obligations plus per-obligation accounting.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub rows: Vec<PriceRow>,
    pub results: Vec<ObligationResult>,
    pub outcome: RunOutcome,
}

struct TaskMessage {
    result: ObligationResult,
    rows: Vec<PriceRow>,
}

pub struct FetchOrchestrator {
    source: Arc<dyn PriceSource>,
    concurrency: usize,
    pacing: Duration,
}

impl FetchOrchestrator {
    pub fn new(source: Arc<dyn PriceSource>, concurrency: usize, pacing: Duration) -> Self {
        Self {
            source,
            concurrency: concurrency.max(1),
            pacing,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run(&self, obligations: Vec<FetchObligation>) -> FetchReport {
        self.run_with_progress(obligations, |_| {}).await
    }

    /// Waits for every obligation. `on_result` fires once per obligation as
    /// it reaches a terminal state, in completion order.
    pub async fn run_with_progress<F>(
        &self,
        obligations: Vec<FetchObligation>,
        mut on_result: F,
    ) -> FetchReport
    where
        F: FnMut(&ObligationResult),
    {
        let mut report = FetchReport::default();
        if obligations.is_empty() {
            return report;
        }

        let expected: Vec<(String, usize)> = obligations
            .iter()
            .map(|o| (o.ticker.clone(), o.len()))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<TaskMessage>(self.concurrency * 2);
        let mut join_set = JoinSet::new();

        for obligation in obligations {
            let sem = Arc::clone(&semaphore);
            let sender = tx.clone();
            let source = Arc::clone(&self.source);
            let pacing = self.pacing;

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let message = fetch_one(source.as_ref(), obligation).await;
                if !pacing.is_zero() {
                    sleep(pacing).await;
                }
                let _ = sender.send(message).await;
            });
        }
        drop(tx);

        let mut reported = HashSet::new();
        while let Some(message) = rx.recv().await {
            on_result(&message.result);
            reported.insert(message.result.ticker.clone());
            report.outcome.record(&message.result);
            report.rows.extend(message.rows);
            report.results.push(message.result);
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Fetch task ended abnormally: {}", e);
            }
        }

        // A task that panicked never reported; it still counts as a failure.
        for (ticker, requested) in expected {
            if reported.contains(&ticker) {
                continue;
            }
            let result = ObligationResult {
                ticker,
                requested,
                status: ObligationStatus::Failed {
                    reason: "fetch task aborted before reporting".to_string(),
                    attempts: 0,
                },
            };
            on_result(&result);
            report.outcome.record(&result);
            report.results.push(result);
        }

        tracing::info!(
            obligations = report.outcome.obligations,
            success = report.outcome.success,
            skipped = report.outcome.skipped,
            failed = report.outcome.failed,
            rows = report.rows.len(),
            "Fetch phase complete"
        );
        report
    }
}

async fn fetch_one(source: &dyn PriceSource, obligation: FetchObligation) -> TaskMessage {
    let FetchObligation { ticker, missing } = obligation;
    let requested = missing.len();

    let (status, rows) = match source.fetch(&ticker).await {
        Ok(FetchOutcome::Rows(rows)) => {
            let rows = filter_to(rows, &missing);
            tracing::info!(ticker = %ticker, requested, rows = rows.len(), "Fetched");
            (ObligationStatus::Fetched { rows: rows.len() }, rows)
        }
        Ok(FetchOutcome::Empty { reason }) => {
            tracing::warn!(ticker = %ticker, "Skipped: {}", reason);
            (ObligationStatus::Skipped { reason }, Vec::new())
        }
        Err(e) => {
            tracing::error!(ticker = %ticker, attempts = e.attempts(), "Failed: {}", e);
            (
                ObligationStatus::Failed {
                    attempts: e.attempts(),
                    reason: e.to_string(),
                },
                Vec::new(),
            )
        }
    };

    TaskMessage {
        result: ObligationResult {
            ticker,
            requested,
            status,
        },
        rows,
    }
}
