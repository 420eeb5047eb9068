//! Search criteria and aggregated result models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::PaperRecord;

/// Sort order for search results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Value of the upstream `sortOrder` parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

/// Sort field for search results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Relevance,
    LastUpdated,
    Submitted,
}

impl SortBy {
    /// Value of the upstream `sortBy` parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::LastUpdated => "lastUpdatedDate",
            SortBy::Submitted => "submittedDate",
        }
    }
}

/// What to search for.
///
/// Exactly one of `query` and `id_list` must be set and non-empty. The fields
/// stay public (and both optional) so criteria can come from config files or
/// the command line; the contract is enforced when query parameters are built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Free-text search expression (`all:electron`, `ti:"quantum computing"`, ...)
    pub query: Option<String>,

    /// Explicit arXiv identifiers
    pub id_list: Option<Vec<String>>,

    /// Sort by field
    pub sort_by: Option<SortBy>,

    /// Sort order
    pub sort_order: Option<SortOrder>,

    /// Offset of the first result
    pub start: Option<u64>,

    /// Maximum number of results; `None` fetches everything upstream reports
    pub max_results: Option<u64>,
}

impl SearchCriteria {
    /// Create criteria for a free-text query
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    /// Create criteria for an identifier lookup
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id_list: Some(ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Set maximum results
    pub fn max_results(mut self, max: u64) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Set the start offset
    pub fn start(mut self, start: u64) -> Self {
        self.start = Some(start);
        self
    }

    /// Set sort by
    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.sort_by = Some(sort);
        self
    }

    /// Set sort order
    pub fn sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = Some(order);
        self
    }
}

/// Bookkeeping collected while a search runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// When the first page was requested
    pub started_at: DateTime<Utc>,

    /// When aggregation stopped
    pub finished_at: DateTime<Utc>,

    /// Wall-clock time spent
    pub duration: Duration,

    /// Pages fetched from upstream
    pub pages_fetched: u32,

    /// Retries across all page requests (attempts beyond the first)
    pub retries: u32,

    /// Entries dropped by the feed parser
    pub skipped_entries: usize,

    /// Records dropped because their identifier was already seen
    pub duplicates_dropped: usize,

    /// Configured page size
    pub page_size: u32,

    /// Source label
    pub source: String,
}

/// The outcome of one logical search.
///
/// Built once by the aggregator and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Identifier of this search run
    pub search_id: String,

    /// Records in upstream order with duplicate identifiers removed
    pub papers: Vec<PaperRecord>,

    /// Result count reported by the most recent page
    pub total_results: u64,

    /// Offset the search started from
    pub start: u64,

    /// Offset the next page would start from
    pub next_offset: u64,

    /// Whether upstream has more results past `next_offset`
    pub has_next: bool,

    /// The criteria this result was produced for
    pub criteria: SearchCriteria,

    /// Aggregation metadata
    pub metadata: SearchMetadata,
}

impl SearchResult {
    /// Number of records returned
    pub fn len(&self) -> usize {
        self.papers.len()
    }

    /// Whether no records were returned
    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }
}

/// One page worth of new records, as yielded by the page stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    /// 1-based page number within the search
    pub page: u32,

    /// Offset this page was requested at
    pub offset: u64,

    /// Records not seen on earlier pages
    pub papers: Vec<PaperRecord>,

    /// Result count reported by this page
    pub total_results: u64,

    /// Entries on this page the parser skipped
    pub skipped_entries: usize,

    /// Attempts the session needed for this page
    pub attempts: u32,
}
