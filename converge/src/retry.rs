//! Bounded retry with backoff for the fallible network boundaries.
//!
//! Transient failures (transport errors, throttling, 5xx) are retried here,
//! inside the component that owns the call; permanent failures are passed
//! through untouched via the caller's retryability predicate.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backoff {
    /// delay = base * 2^attempt, capped.
    #[default]
    Exponential,
    /// delay = base, capped.
    Constant,
}

/// Randomization applied to each delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Jitter {
    /// Use the computed delay as-is.
    #[default]
    None,
    /// Random in [0, delay].
    Full,
}

/// Retry policy: attempt budget plus delay shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Per-delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Growth strategy.
    pub backoff: Backoff,
    /// Jitter strategy.
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff: Backoff::Exponential,
            jitter: Jitter::None,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy: 5 attempts, 1s base, factor 2, 30s cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the per-delay cap.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// The delay to sleep after the given zero-indexed failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = match self.backoff {
            Backoff::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
            Backoff::Constant => self.base_delay_ms,
        };
        let capped = raw.min(self.max_delay_ms);
        let jittered = match self.jitter {
            Jitter::None => capped,
            Jitter::Full => {
                if capped == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=capped)
                }
            }
        };
        Duration::from_millis(jittered)
    }
}

/// Runs `operation` until it succeeds, the error is not retryable, or the
/// attempt budget is exhausted. The last error is returned unchanged.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !retryable(&e) {
                    tracing::debug!(operation = what, error = %e, "not retryable, giving up");
                    return Err(e);
                }
                attempt += 1;
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        operation = what,
                        attempts = attempt,
                        error = %e,
                        "retry budget exhausted"
                    );
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::debug!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
