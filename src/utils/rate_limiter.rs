//! Calls-per-period rate limiting shared by every upstream request.
//!
//! [`RateLimiter::acquire`] admits at most `calls` grants inside any trailing
//! window of length `period`. Grants are recorded in a sliding log of the
//! last `calls` grant instants; a caller that finds the log full sleeps until
//! the oldest grant leaves the window.
//!
//! Waiters queue on a `tokio::sync::Mutex`, which hands the lock out in
//! arrival order, and the lock is held across the sleep. Grants are therefore
//! FIFO, and a waiter that is cancelled simply drops the guard without having
//! appended to the log, so no slot is ever consumed by a cancelled caller.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Sliding-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    /// Grants allowed per window
    calls: usize,

    /// Window length
    period: Duration,

    /// Instants of the most recent grants, oldest first
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `calls` grants per `period`.
    ///
    /// `calls == 0` or a zero `period` yields a limiter that never waits.
    pub fn new(calls: u32, period: Duration) -> Self {
        debug!(calls, period_ms = period.as_millis() as u64, "creating rate limiter");
        Self {
            calls: calls as usize,
            period,
            grants: Mutex::new(VecDeque::with_capacity(calls as usize)),
        }
    }

    /// Create a limiter that never waits
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Whether this limiter never waits
    pub fn is_disabled(&self) -> bool {
        self.calls == 0 || self.period.is_zero()
    }

    /// Wait until a grant is available, then take it
    pub async fn acquire(&self) {
        if self.is_disabled() {
            return;
        }

        let mut grants = self.grants.lock().await;
        loop {
            let now = Instant::now();
            while grants
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= self.period)
            {
                grants.pop_front();
            }

            if grants.len() < self.calls {
                grants.push_back(now);
                return;
            }

            if let Some(oldest) = grants.front().copied() {
                let ready_at = oldest + self.period;
                debug!(
                    wait_ms = ready_at.duration_since(now).as_millis() as u64,
                    in_window = grants.len(),
                    max_calls = self.calls,
                    "rate limit reached, waiting"
                );
                sleep_until(ready_at).await;
            }
        }
    }

    /// Grants still available in the current window
    pub async fn remaining(&self) -> usize {
        if self.is_disabled() {
            return usize::MAX;
        }
        let grants = self.grants.lock().await;
        let now = Instant::now();
        let live = grants
            .iter()
            .filter(|at| now.duration_since(**at) < self.period)
            .count();
        self.calls.saturating_sub(live)
    }
}
