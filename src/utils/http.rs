//! Rate-limited, retrying HTTP session.
//!
//! One [`Session`] owns the connection pool, the concurrency semaphore, the
//! rate limiter and the retry policy. Every upstream call, page request or
//! artifact download, goes through [`Session::execute`]:
//!
//! 1. take a concurrency permit,
//! 2. take a rate-limiter grant,
//! 3. send the request and hand the response to the caller's consumer, all
//!    under the per-attempt timeout,
//! 4. release the permit (RAII, on every exit path),
//! 5. on a transient failure, sleep the backoff delay and go back to 1.
//!
//! Shutting the session down closes the semaphore and wakes every attempt
//! and backoff sleep, which then return [`ArxivError::Cancelled`].

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::rate_limiter::RateLimiter;
use super::retry::{is_transient_reqwest_error, parse_retry_after, RetryPolicy};
use crate::arxiv::ArxivError;
use crate::config::ClientConfig;

/// One unparsed page response
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Final request URL including query
    pub url: String,
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: String,
}

/// A value obtained through the session, with the attempts it took
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why a single attempt failed
#[derive(Debug)]
pub enum AttemptError {
    /// Worth another attempt (network blip, timeout, 429, 5xx)
    Retryable {
        status: Option<u16>,
        retry_after: Option<Duration>,
        message: String,
    },
    /// Upstream refused the request; retrying cannot help
    Rejected { status: Option<u16>, message: String },
    /// Local failure that ends the call as-is
    Fatal(ArxivError),
}

impl AttemptError {
    /// A transient failure without a status code
    pub fn retryable(message: impl Into<String>) -> Self {
        AttemptError::Retryable {
            status: None,
            retry_after: None,
            message: message.into(),
        }
    }

    /// Classify a reqwest error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if is_transient_reqwest_error(&err) {
            AttemptError::Retryable {
                status,
                retry_after: None,
                message: err.to_string(),
            }
        } else {
            AttemptError::Rejected {
                status,
                message: err.to_string(),
            }
        }
    }
}

/// Shared upstream session
#[derive(Debug)]
pub struct Session {
    client: Client,
    limiter: RateLimiter,
    semaphore: Semaphore,
    max_concurrent: usize,
    policy: RetryPolicy,
    timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl Session {
    /// Build a session from configuration, validating it first
    pub fn new(config: &ClientConfig) -> Result<Self, ArxivError> {
        config.validate()?;

        let timeout = config.timeout();
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(proxy) = &config.proxy {
            debug!(proxy = %proxy, "using upstream proxy");
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| ArxivError::Configuration(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ArxivError::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self::from_parts(
            client,
            RateLimiter::new(config.rate_limit_calls, config.rate_limit_period()),
            config.max_concurrent_requests,
            RetryPolicy::from_config(config),
            timeout,
        ))
    }

    /// Assemble a session from already-built parts
    pub fn from_parts(
        client: Client,
        limiter: RateLimiter,
        max_concurrent: usize,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            client,
            limiter,
            semaphore: Semaphore::new(max_concurrent.max(1)),
            max_concurrent: max_concurrent.max(1),
            policy,
            timeout,
            shutdown,
        }
    }

    /// The retry policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Configured concurrency cap
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Permits not currently held by an in-flight request
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Abort in-flight and future calls
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("session shutting down");
        }
        self.semaphore.close();
    }

    /// Whether [`Session::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// GET `url` and read the body as text
    pub async fn get_page(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Fetched<RawPage>, ArxivError> {
        self.execute(url, query, |response: Response| async move {
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let url = response.url().to_string();
            let body = response.text().await.map_err(AttemptError::from_reqwest)?;
            Ok::<_, AttemptError>(RawPage {
                url,
                status,
                headers,
                body,
            })
        })
        .await
    }

    /// GET `url` with retries, passing each successful response to `consume`.
    ///
    /// `consume` runs while the concurrency permit is held and inside the
    /// per-attempt timeout, so it may stream the body. It is called again on
    /// every retried attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        url: &str,
        query: &[(&str, String)],
        mut consume: F,
    ) -> Result<Fetched<T>, ArxivError>
    where
        F: FnMut(Response) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut shutdown = self.shutdown.subscribe();
        let mut attempts = 0;

        loop {
            if self.is_shut_down() {
                return Err(ArxivError::Cancelled);
            }
            attempts += 1;

            let outcome = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => return Err(ArxivError::Cancelled),
                outcome = self.attempt(url, query, &mut consume) => outcome,
            };

            match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        info!(
                            "Request to {} succeeded on attempt {} after {} transient failures",
                            url,
                            attempts,
                            attempts - 1
                        );
                    }
                    return Ok(Fetched { value, attempts });
                }
                Err(AttemptError::Rejected { status, message }) => {
                    warn!("Request to {} rejected: {}", url, message);
                    return Err(ArxivError::Http {
                        status,
                        attempts,
                        message,
                    });
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Retryable {
                    status,
                    retry_after,
                    message,
                }) => {
                    if !self.policy.should_retry(attempts) {
                        warn!(
                            "Request to {} failed after {} attempts: {}",
                            url, attempts, message
                        );
                        return Err(ArxivError::Http {
                            status,
                            attempts,
                            message,
                        });
                    }

                    let delay = self.policy.delay_with_hint(attempts, retry_after);
                    debug!(
                        "Transient error on attempt {}/{} for {}: {}, retrying in {:?}",
                        attempts,
                        self.policy.max_attempts(),
                        url,
                        message,
                        delay
                    );

                    tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|stopped| *stopped) => return Err(ArxivError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        url: &str,
        query: &[(&str, String)],
        consume: &mut F,
    ) -> Result<T, AttemptError>
    where
        F: FnMut(Response) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AttemptError::Fatal(ArxivError::Cancelled))?;
        self.limiter.acquire().await;

        let started = Instant::now();
        debug!("Starting request: GET {}", url);

        let call = async {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(AttemptError::from_reqwest)?;

            let status = response.status();
            debug!(
                "Ending request: {} {} - Time elapsed: {:.2} seconds",
                status,
                url,
                started.elapsed().as_secs_f64()
            );

            if !status.is_success() {
                return Err(status_error(status, response.headers()));
            }
            consume(response).await
        };

        match timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::retryable(format!(
                "request timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

fn status_error(status: StatusCode, headers: &HeaderMap) -> AttemptError {
    let message = format!("upstream returned HTTP {}", status);
    if RetryPolicy::is_retryable_status(status) {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        AttemptError::Retryable {
            status: Some(status.as_u16()),
            retry_after,
            message,
        }
    } else {
        AttemptError::Rejected {
            status: Some(status.as_u16()),
            message,
        }
    }
}
