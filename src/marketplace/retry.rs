//! Retry policy for handling transient failures with exponential backoff
//!
//! One policy object owns the backoff math for both the API client and the
//! queue poller: maximum retries, base delay, multiplier, and whether a
//! server-supplied Retry-After hint overrides the computed backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RetryableError;

/// Retry policy with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Backoff multiplier per retry
    pub multiplier: f64,
    /// Honor a server-supplied Retry-After hint over the computed backoff
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 3 retries at 1s, 2s, 4s
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a given retry budget and the default 1s/x2 curve
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Backoff delay before retry number `attempt` (0-based)
    ///
    /// `base_delay * multiplier^attempt`: 1s, 2s, 4s with the defaults.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.mul_f64(self.multiplier.powi(attempt as i32))
    }

    /// Execute an async operation with retry logic
    ///
    /// The operation is retried while it returns a retryable error, up to
    /// `max_retries` times, sleeping `delay_for(attempt)` between attempts
    /// (or the error's Retry-After hint when configured).
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.max_retries {
                        if attempt >= self.max_retries {
                            warn!(
                                attempts = attempt + 1,
                                max_retries = self.max_retries,
                                "Max retries exhausted"
                            );
                        }
                        return Err(err);
                    }

                    let backoff = match err.retry_after() {
                        Some(hint) if self.respect_retry_after => hint,
                        _ => self.delay_for(attempt),
                    };
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
