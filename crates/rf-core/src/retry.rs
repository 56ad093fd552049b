//! Bounded retry with exponential backoff.
//!
//! Used by the producer for per-record publishes: the operation is attempted
//! up to `max_attempts` times, sleeping between attempts with a backoff that
//! doubles each time up to `max_backoff`. The last error is returned when the
//! budget is exhausted.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff: Duration::from_millis(100), max_backoff: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1u32 << shift).min(self.max_backoff)
    }
}

/// Run `op` until it succeeds or the policy's attempt budget is spent.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let backoff = policy.backoff_after(attempt);
                warn!("[{label}] attempt {attempt}/{max_attempts} failed: {e}, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
