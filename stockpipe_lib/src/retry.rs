//! Bounded retry with fixed or jittered exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio::time::sleep;

/// Wait between attempts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        delay_ms: u64,
    },
    /// `base * 2^n`, capped at `max`, then spread by `±jitter_pct`.
    Exponential {
        base_ms: u64,
        max_ms: u64,
        jitter_pct: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
}

/// Last error plus how many attempts were spent on it.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: usize,
    pub error: E,
}

impl RetryPolicy {
    /// Constant delay between attempts.
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
        }
        .clamped()
    }

    pub fn exponential(max_attempts: usize, base_ms: u64, max_ms: u64, jitter_pct: f64) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base_ms,
                max_ms,
                jitter_pct,
            },
        }
        .clamped()
    }

    /// Normalizes out-of-range values, e.g. from a config file.
    pub fn clamped(self) -> Self {
        let backoff = match self.backoff {
            Backoff::Fixed { delay_ms } => Backoff::Fixed { delay_ms },
            Backoff::Exponential {
                base_ms,
                max_ms,
                jitter_pct,
            } => {
                let base_ms = base_ms.max(1);
                Backoff::Exponential {
                    base_ms,
                    max_ms: max_ms.max(base_ms),
                    jitter_pct: jitter_pct.clamp(0.0, 1.0),
                }
            }
        };
        Self {
            max_attempts: self.max_attempts.max(1),
            backoff,
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match &self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential {
                base_ms,
                max_ms,
                jitter_pct,
            } => {
                let shift = attempt.saturating_sub(1).min(30) as u32;
                let delay = base_ms.saturating_mul(1u64 << shift).min(*max_ms);
                if *jitter_pct <= 0.0 {
                    return Duration::from_millis(delay);
                }
                let spread = (delay as f64 * jitter_pct) as i64;
                let delta = rand::thread_rng().gen_range(-spread..=spread);
                Duration::from_millis(delay.saturating_add_signed(delta))
            }
        }
    }

    /// Runs `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget runs out. `op` receives the 1-based attempt number.
    pub async fn retry_async<F, Fut, T, E, R>(
        &self,
        label: &str,
        is_retryable: R,
        mut op: F,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_attempts || !is_retryable(&error) {
                        return Err(RetryFailure {
                            attempts: attempt,
                            error,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        label,
                        attempt,
                        self.max_attempts,
                        delay.as_secs_f64(),
                        error
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}
