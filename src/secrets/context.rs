//! Per-request context carried by every backend call.
//!
//! A [`RequestContext`] bundles a cancellation token with a deadline. Backend
//! futures are driven through [`RequestContext::run`] so a slow or hung backend
//! surfaces as [`SecretsError::Timeout`] and caller cancellation surfaces as
//! [`SecretsError::Cancelled`], never as a silent hang.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{MutationOutcome, Result, SecretsError};

/// Default upper bound on a single backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Kind of backend call, used to report the outcome of an interrupted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { cancel: CancellationToken::new(), deadline: Instant::now() + timeout, timeout }
    }

    /// Bind the context to an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this request (and every child of it) when triggered.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fail fast if the request is already cancelled or past its deadline.
    ///
    /// Used before the first side effect of a multi-step mutation, where the
    /// outcome is known to be [`MutationOutcome::NotApplied`].
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(SecretsError::cancelled(operation, MutationOutcome::NotApplied));
        }
        if self.remaining().is_zero() {
            return Err(SecretsError::timeout(operation, self.timeout.as_millis() as u64));
        }
        Ok(())
    }

    /// Drive a backend future, bounded by the deadline and the cancellation token.
    ///
    /// An interrupted [`CallKind::Write`] reports [`MutationOutcome::Unknown`],
    /// an interrupted read reports [`MutationOutcome::NotApplied`].
    pub async fn run<T, F>(&self, operation: &str, kind: CallKind, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;

        let outcome = match kind {
            CallKind::Read => MutationOutcome::NotApplied,
            CallKind::Write => MutationOutcome::Unknown,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(operation = %operation, outcome = %outcome, "Backend call cancelled");
                Err(SecretsError::cancelled(operation, outcome))
            }
            res = tokio::time::timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => {
                    tracing::warn!(
                        operation = %operation,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Backend call timed out"
                    );
                    Err(SecretsError::timeout(operation, self.timeout.as_millis() as u64))
                }
            },
        }
    }
}
