//! Bounded retry policy for outbound calls.
//!
//! The policy knows nothing about the operation it wraps: callers hand it a
//! closure producing a fresh future per attempt and a predicate deciding which
//! errors are worth another attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base`, `2 * base`, `4 * base`, ...
    Exponential { base: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub const fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base },
        }
    }

    /// A policy that never retries.
    pub const fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay slept before attempt number `attempt` (1-based, so attempt 2 is the first retry).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base } => {
                let shift = (attempt - 2).min(16);
                base.saturating_mul(1 << shift)
            }
        }
    }

    /// Runs `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut, R>(&self, label: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.delay_before(attempt + 1);
                    warn!(
                        "{label} attempt {attempt}/{max_attempts} failed: {e}; retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
