//! Retry budget for stage attempts.

use std::time::Duration;

use datapipe_core::policy::{MAX_ATTEMPTS, RETRY_BACKOFF};

/// How many times a stage runs and how long to wait between attempts.
///
/// The backoff is fixed: every wait has the same length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Wait after each failed attempt that will be retried.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A policy with at least one attempt.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether another attempt follows once `attempts_made` have failed.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, RETRY_BACKOFF)
    }
}
