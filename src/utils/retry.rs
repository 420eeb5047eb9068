//! Retry policy with exponential backoff for upstream calls.
//!
//! The policy is plain data plus pure functions, so delays and retry
//! decisions can be tested without any network I/O. The session in
//! [`super::http`] drives the actual attempt loop.

use reqwest::StatusCode;
use std::time::Duration;

use crate::config::ClientConfig;

/// How many times to retry and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Build the policy from validated configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_secs_f64(config.min_wait_secs),
            max_delay: Duration::from_secs_f64(config.max_wait_secs),
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts()
    }

    /// Delay before the retry that follows attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Delay for `attempt`, stretched to honor a server-provided hint
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.delay_for(attempt);
        match retry_after {
            Some(hint) => base.max(hint.min(self.max_delay)),
            None => base,
        }
    }

    /// Statuses worth another attempt: 429 and every 5xx
    pub fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }
}

/// Check if a reqwest error is worth another attempt.
///
/// Builder errors mean the request itself is malformed and will fail the
/// same way every time.
pub fn is_transient_reqwest_error(err: &reqwest::Error) -> bool {
    if err.is_builder() || err.is_redirect() {
        return false;
    }
    if let Some(status) = err.status() {
        return RetryPolicy::is_retryable_status(status);
    }
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
}

/// Parse a numeric `Retry-After` header value
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
