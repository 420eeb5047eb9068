//! arXiv client.
//!
//! [`ArxivClient`] is the single owning handle for one configured client. It
//! builds the shared [`Session`] (connection pool, concurrency semaphore,
//! rate limiter, retry policy) once and passes it to the search aggregator
//! and, when enabled, the downloader. Closing or dropping the client shuts the
//! session down, which aborts every in-flight request.
//!
//! ```rust,no_run
//! use arxiv_harvest::{ArxivClient, ClientConfig, SearchCriteria};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ArxivClient::new(ClientConfig::default())?;
//! let result = client
//!     .search(SearchCriteria::query("ti:\"quantum computing\"").max_results(25))
//!     .await?;
//! for paper in &result.papers {
//!     println!("{} {}", paper.id, paper.title);
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```

mod download;
mod feed;
mod query;
mod search;

pub use download::{ensure_writable, DownloadTracker, Downloader};
pub use feed::{parse_feed, parse_page, parse_timestamp, ParsedPage, RawAuthor, RawEntry, RawLink, SkipReason};
pub use query::{build_query_params, validate_criteria, QueryTarget};
pub use search::{search_id, Paginator, SearchAggregator, SOURCE_LABEL};

use futures_util::Stream;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::models::{
    DownloadOutcome, DownloadReport, PaperRecord, SearchCriteria, SearchPage, SearchResult,
};
use crate::utils::Session;

/// Errors surfaced by the client
#[derive(Debug, thiserror::Error)]
pub enum ArxivError {
    /// Invalid settings at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Contradictory or missing search criteria; no request was sent
    #[error("Invalid search criteria: {0}")]
    QueryBuild(String),

    /// Non-retryable status, or retries exhausted
    #[error("HTTP error after {attempts} attempt(s){}: {message}", status_suffix(.status))]
    Http {
        status: Option<u16>,
        attempts: u32,
        message: String,
    },

    /// Malformed page payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// A single artifact could not be fetched or written
    #[error("Download error: {0}")]
    Download(String),

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client was closed while the operation was pending
    #[error("Operation cancelled: client closed")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {})", s)).unwrap_or_default()
}

impl ArxivError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ArxivError::Http { status, .. } => *status,
            _ => None,
        }
    }

    /// Attempts made before the error surfaced, if it came from the session
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ArxivError::Http { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

/// Owning handle for searches and downloads
#[derive(Debug)]
pub struct ArxivClient {
    config: ClientConfig,
    session: Arc<Session>,
    aggregator: SearchAggregator,
    downloader: Option<Downloader>,
}

impl ArxivClient {
    /// Validate `config` and build the shared session.
    ///
    /// With `enable_downloader` set, the download directory is created and
    /// probed for writability; failure is a configuration error.
    pub fn new(config: ClientConfig) -> Result<Self, ArxivError> {
        let session = Arc::new(Session::new(&config)?);
        let aggregator =
            SearchAggregator::new(Arc::clone(&session), config.base_url.clone(), config.page_size);
        let downloader = if config.enable_downloader {
            Some(Downloader::new(
                Arc::clone(&session),
                config.resolved_download_dir(),
            )?)
        } else {
            debug!("Downloader disabled");
            None
        };

        info!(
            "arXiv client ready: {} (page size {}, {} concurrent, {} calls per {:?})",
            config.base_url,
            config.page_size,
            config.max_concurrent_requests,
            config.rate_limit_calls,
            config.rate_limit_period()
        );

        Ok(Self {
            config,
            session,
            aggregator,
            downloader,
        })
    }

    /// Effective configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The shared session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether downloads are enabled
    pub fn downloads_enabled(&self) -> bool {
        self.downloader.is_some()
    }

    /// Download directory, when downloads are enabled
    pub fn download_dir(&self) -> Option<&Path> {
        self.downloader.as_ref().map(Downloader::dir)
    }

    /// Run a search to completion.
    ///
    /// Either every page is fetched and parsed, or the call fails; partial
    /// results are never returned.
    pub async fn search(&self, criteria: SearchCriteria) -> Result<SearchResult, ArxivError> {
        self.aggregator.search(criteria).await
    }

    /// Stream a search page by page
    pub fn search_pages(
        &self,
        criteria: SearchCriteria,
    ) -> impl Stream<Item = Result<SearchPage, ArxivError>> + '_ {
        self.aggregator.pages(criteria)
    }

    /// Download one paper's PDF, optionally under a custom file name
    pub async fn download_one(&self, paper: &PaperRecord, filename: Option<&str>) -> DownloadOutcome {
        match &self.downloader {
            Some(downloader) => downloader.download_one(paper, filename).await,
            None => DownloadOutcome::Disabled,
        }
    }

    /// Download the PDFs of every paper in a search result
    pub async fn download_all(&self, result: &SearchResult) -> DownloadReport {
        self.download_papers(&result.papers).await
    }

    /// Download the PDFs of an explicit set of papers
    pub async fn download_papers(&self, papers: &[PaperRecord]) -> DownloadReport {
        match &self.downloader {
            Some(downloader) => DownloadReport::Finished(downloader.download_all(papers).await),
            None => DownloadReport::Disabled,
        }
    }

    /// Download into a caller-owned tracker so progress can be watched
    pub async fn download_tracked(
        &self,
        papers: &[PaperRecord],
        tracker: &DownloadTracker,
    ) -> DownloadReport {
        match &self.downloader {
            Some(downloader) => {
                downloader.download_with_tracker(papers, tracker).await;
                DownloadReport::Finished(tracker.snapshot())
            }
            None => DownloadReport::Disabled,
        }
    }

    /// Shut the session down, aborting anything still in flight
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ArxivClient {
    fn drop(&mut self) {
        debug!("Closing arXiv client");
        self.session.shutdown();
    }
}
