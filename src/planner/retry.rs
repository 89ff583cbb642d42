//! Retry policy for provider calls.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExecutionConfig;
use crate::error::{ExecutionError, ProviderError, StrataError};
use crate::provider::ProviderResult;

/// Exponential backoff for transient provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl RetryPolicy {
    /// Builds the policy from execution settings.
    #[must_use]
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Returns the delay after failed attempt number `attempt` (1-based).
    ///
    /// A provider hint wins over the computed backoff; both are capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, hint_ms: Option<u64>) -> Duration {
        let delay = match hint_ms {
            Some(ms) => Duration::from_millis(ms),
            None => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_backoff.saturating_mul(factor)
            }
        };
        delay.min(self.max_backoff)
    }

    /// Runs `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `timeout`; an attempt that times out counts
    /// as transient. Returns the outcome and the number of attempts made.
    pub async fn run<T, F, Fut>(&self, resource: &str, timeout: Duration, mut call: F) -> (Result<T, StrataError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::transient(format!(
                    "Provider call timed out after {}s",
                    timeout.as_secs_f64()
                ))),
            };

            let error = match outcome {
                Ok(value) => return (Ok(value), attempt),
                Err(error) => error,
            };

            let hint = match &error {
                ProviderError::Transient { retry_after_ms, .. } => *retry_after_ms,
                ProviderError::Permanent { .. } => {
                    warn!("{resource}: {error}");
                    return (Err(error.into()), attempt);
                }
            };

            if attempt >= self.max_attempts {
                let exhausted = ExecutionError::RetriesExhausted {
                    attempts: attempt,
                    resource: resource.to_string(),
                    last_error: error,
                };
                return (Err(exhausted.into()), attempt);
            }

            let delay = self.delay_for(attempt, hint);
            debug!(
                "{resource}: attempt {attempt} of {} failed ({error}), retrying in {}ms",
                self.max_attempts,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
