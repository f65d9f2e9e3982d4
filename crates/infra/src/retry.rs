//! Caller-side retry for lost optimistic races.
//!
//! The mutator itself never retries. Wrap a whole read-plan-commit operation
//! in [`retry_on_conflict`] to re-run it after a `ConcurrentModification`.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stockledger_core::StockResult;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_attempts` total attempts without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Backoff before the retry that follows failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. Only `ConcurrentModification` is retried.
pub fn retry_on_conflict<T, F>(policy: &RetryPolicy, mut op: F) -> StockResult<T>
where
    F: FnMut() -> StockResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt = attempt + 1, "stock operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let backoff = policy.backoff(attempt);
                warn!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "stock operation lost a concurrent update, retrying"
                );
                if !backoff.is_zero() {
                    thread::sleep(backoff);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
