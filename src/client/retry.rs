//! Retry policy with exponential backoff.
//!
//! One policy type serves both the metadata transport and the heavier
//! upload path; callers pick a profile instead of hardcoding constants.

use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Profile for metadata requests.
    pub const fn transport() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Profile for batch archive uploads: more attempts, longer base delay,
    /// since a single attempt can already represent minutes of transfer.
    pub const fn upload() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(64),
        }
    }

    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
        }
    }

    /// Delay before retry number `attempt` (zero-based): base doubling per
    /// attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transport()
    }
}

/// Retryable: 429 (rate limit) and 5xx (server errors).
/// Non-retryable: 2xx, 401/403 (auth), other 4xx (client error).
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
