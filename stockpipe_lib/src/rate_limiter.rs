//! Sliding-window request budget shared by every fetch task.
//!
//! The upstream plan allows a fixed number of calls per minute. The limiter
//! is acquired before each HTTP attempt, retries included, so bursts from
//! concurrent tasks cannot exceed the budget.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Premium-tier budget with a small margin.
pub const DEFAULT_CALLS_PER_MINUTE: u64 = 110;

pub struct RateLimiter {
    timestamps: Mutex<VecDeque<Instant>>,
    max_requests: u64,
    window: Duration,
    tracker: RequestTracker,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests as usize)),
            max_requests,
            window,
            tracker: RequestTracker::default(),
        }
    }

    pub fn per_minute(calls: u64) -> Self {
        Self::new(calls, Duration::from_secs(60))
    }

    /// Waits for a free slot in the window, then claims it.
    pub async fn acquire(&self) {
        loop {
            let now = Instant::now();
            let mut ts = self.timestamps.lock().await;

            while ts
                .front()
                .is_some_and(|&t| now.duration_since(t) >= self.window)
            {
                ts.pop_front();
            }

            if (ts.len() as u64) < self.max_requests {
                ts.push_back(now);
                return;
            }

            let oldest = ts.front().copied().unwrap_or(now);

            let wait = (oldest + self.window).saturating_duration_since(now);
            drop(ts);
            self.tracker.record_throttle(wait);
            sleep(wait).await;
        }
    }

    /// Slots left in the current window, or `None` if the lock is busy.
    pub fn remaining_budget(&self) -> Option<u64> {
        let ts = self.timestamps.try_lock().ok()?;
        let now = Instant::now();
        let active = ts
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count() as u64;
        Some(self.max_requests.saturating_sub(active))
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_CALLS_PER_MINUTE)
    }
}

/// Counters for upstream requests, updated from any task.
#[derive(Default)]
pub struct RequestTracker {
    requests_made: AtomicU64,
    with_data: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
    throttled_ms: AtomicU64,
}

impl RequestTracker {
    pub fn record_data(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.with_data.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self, waited: Duration) {
        self.throttled_ms
            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            requests_made: self.requests_made.load(Ordering::Relaxed),
            with_data: self.with_data.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            throttled_secs: self.throttled_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerSummary {
    pub requests_made: u64,
    pub with_data: u64,
    pub empty: u64,
    pub failed: u64,
    pub throttled_secs: f64,
}
