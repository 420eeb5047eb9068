//! Utility modules supporting the client.
//!
//! - [`RateLimiter`]: calls-per-period limiter with FIFO, cancel-safe waits
//! - [`RetryPolicy`]: exponential backoff and retryable-status predicate
//! - [`Session`]: shared HTTP session applying the limiter, a concurrency
//!   cap, per-attempt timeouts and the retry policy to every request
//! - [`sanitize`]: filesystem-safe names for downloaded PDFs
//!
//! # Retry with Backoff
//!
//! ```rust
//! use arxiv_harvest::utils::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_attempts(), 4);
//! assert_eq!(policy.delay_for(1), Duration::from_secs(3));
//! assert_eq!(policy.delay_for(2), Duration::from_secs(6));
//! ```

mod filename;
mod http;
mod rate_limiter;
mod retry;

pub use filename::{override_file_name, paper_file_name, sanitize, MAX_STEM_LEN};
pub use http::{AttemptError, Fetched, RawPage, Session};
pub use rate_limiter::RateLimiter;
pub use retry::{is_transient_reqwest_error, parse_retry_after, RetryPolicy};
