//! Bounded retry for idempotent backend reads.

use std::future::Future;
use std::time::Duration;

use super::context::RequestContext;
use super::error::{MutationOutcome, Result, SecretsError};

/// Exponential backoff policy for read operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that performs exactly one attempt.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted.
    ///
    /// Backoff never outlives `ctx`: a retry that could not start before the
    /// deadline is not attempted, and cancellation interrupts the wait.
    /// Only use this for idempotent reads; create-only writes must not be retried.
    pub async fn retry<T, F, Fut>(&self, ctx: &RequestContext, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts && ctx.remaining() > backoff => {
                    tracing::debug!(
                        operation = %operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying backend read"
                    );
                    tokio::select! {
                        _ = ctx.cancellation_token().cancelled() => {
                            return Err(SecretsError::cancelled(operation, MutationOutcome::NotApplied));
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
