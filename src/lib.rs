//! # arxiv-harvest
//!
//! An asynchronous client for the arXiv query API: paginated searches
//! aggregated into one deduplicated result, and concurrent PDF downloads.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Core data structures (PaperRecord, SearchCriteria, SearchResult, etc.)
//! - [`arxiv`]: The client handle, feed parser, search aggregator and downloader
//! - [`utils`]: Rate limiter, retry policy, HTTP session and file naming
//! - [`config`]: Configuration management
//!
//! All network traffic of one [`ArxivClient`] goes through a single shared
//! session, so the rate limit and concurrency cap apply across searches and
//! downloads alike.

pub mod arxiv;
pub mod config;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use arxiv::{ArxivClient, ArxivError};
pub use config::{load_config, ClientConfig};
pub use models::{PaperRecord, SearchCriteria, SearchResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
