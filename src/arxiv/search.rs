//! Search aggregation over paginated upstream results.
//!
//! Pages are fetched strictly one after another because each request's
//! offset depends on how many entries the previous page actually returned.
//! [`Paginator`] holds the per-search state and is shared by the collecting
//! [`SearchAggregator::search`] and the streaming [`SearchAggregator::pages`].
//!
//! A page fetch stops the loop when any of these holds, checked in order:
//! the requested `max_results` has been collected, the last page returned no
//! entries, or the offset reached the total upstream reported on the most
//! recent page. An error from the session or the parser ends the whole
//! search; no truncated result is returned.

use async_stream::stream;
use chrono::Utc;
use futures_util::Stream;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::feed::parse_page;
use super::query::{build_query_params, validate_criteria};
use super::ArxivError;
use crate::models::{PaperRecord, SearchCriteria, SearchMetadata, SearchPage, SearchResult};
use crate::utils::Session;

/// Label recorded in search metadata
pub const SOURCE_LABEL: &str = "arxiv";

/// Pagination state of one logical search
#[derive(Debug)]
pub struct Paginator {
    criteria: SearchCriteria,
    page_size: u32,
    start: u64,
    offset: u64,
    collected: u64,
    total: Option<u64>,
    seen: HashSet<String>,
    pages: u32,
    retries: u32,
    skipped: usize,
    duplicates: usize,
    done: bool,
    started_at: chrono::DateTime<Utc>,
    clock: Instant,
}

impl Paginator {
    /// Validate the criteria and set up the first page
    pub fn new(criteria: SearchCriteria, page_size: u32) -> Result<Self, ArxivError> {
        validate_criteria(&criteria)?;
        let start = criteria.start.unwrap_or(0);
        Ok(Self {
            criteria,
            page_size: page_size.max(1),
            start,
            offset: start,
            collected: 0,
            total: None,
            seen: HashSet::new(),
            pages: 0,
            retries: 0,
            skipped: 0,
            duplicates: 0,
            done: false,
            started_at: Utc::now(),
            clock: Instant::now(),
        })
    }

    /// Whether no further page will be requested
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Offset the next page would be requested at
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Entries still wanted, `None` when unbounded
    fn remaining(&self) -> Option<u64> {
        self.criteria
            .max_results
            .map(|max| max.saturating_sub(self.collected))
    }

    /// Page size for the next request
    pub fn next_page_size(&self) -> u64 {
        let configured = u64::from(self.page_size);
        match self.remaining() {
            Some(remaining) => configured.min(remaining),
            None => configured,
        }
    }

    fn should_stop(&self) -> bool {
        if self.remaining() == Some(0) {
            debug!("Stopping pagination: max_results reached");
            return true;
        }
        if let Some(total) = self.total {
            if self.offset >= total {
                debug!("Stopping pagination: offset {} reached total {}", self.offset, total);
                return true;
            }
        }
        false
    }

    /// Fetch the next page, or `Ok(None)` once pagination has finished
    pub async fn next_page(
        &mut self,
        session: &Session,
        base_url: &str,
    ) -> Result<Option<SearchPage>, ArxivError> {
        if self.done || self.should_stop() {
            self.done = true;
            return Ok(None);
        }

        let page_size = self.next_page_size();
        let params = build_query_params(&self.criteria, self.offset, page_size)?;
        debug!(
            "Requesting page {} at offset {} with size {}",
            self.pages + 1,
            self.offset,
            page_size
        );

        let fetched = match session.get_page(base_url, &params).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        let parsed = match parse_page(&fetched.value) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        self.pages += 1;
        self.retries += fetched.attempts.saturating_sub(1);
        self.skipped += parsed.skipped.len();

        if let Some(previous) = self.total {
            if previous != parsed.total_results {
                info!(
                    "Upstream total changed from {} to {} between pages; using the latest",
                    previous, parsed.total_results
                );
            }
        }
        self.total = Some(parsed.total_results);

        let requested_at = self.offset;
        let returned = parsed.entries_returned() as u64;
        self.offset += returned;

        let mut papers = Vec::with_capacity(parsed.papers.len());
        for paper in parsed.papers {
            if self.remaining() == Some(0) {
                break;
            }
            if self.seen.insert(paper.id.clone()) {
                self.collected += 1;
                papers.push(paper);
            } else {
                debug!("Dropping duplicate entry {}", paper.id);
                self.duplicates += 1;
            }
        }

        if returned == 0 {
            debug!("Stopping pagination: page at offset {} was empty", requested_at);
            self.done = true;
        }

        Ok(Some(SearchPage {
            page: self.pages,
            offset: requested_at,
            papers,
            total_results: parsed.total_results,
            skipped_entries: parsed.skipped.len(),
            attempts: fetched.attempts,
        }))
    }

    /// Build the final result from the collected records
    pub fn finish(self, papers: Vec<PaperRecord>) -> SearchResult {
        let total = self.total.unwrap_or(0);
        let finished_at = Utc::now();
        let search_id = search_id(&self.criteria, &self.started_at);

        SearchResult {
            search_id,
            papers,
            total_results: total,
            start: self.start,
            next_offset: self.offset,
            has_next: self.offset < total,
            metadata: SearchMetadata {
                started_at: self.started_at,
                finished_at,
                duration: self.clock.elapsed(),
                pages_fetched: self.pages,
                retries: self.retries,
                skipped_entries: self.skipped,
                duplicates_dropped: self.duplicates,
                page_size: self.page_size,
                source: SOURCE_LABEL.to_string(),
            },
            criteria: self.criteria,
        }
    }
}

/// Identifier for one search run: md5 of the criteria and start time
pub fn search_id(criteria: &SearchCriteria, started_at: &chrono::DateTime<Utc>) -> String {
    let serialized = serde_json::to_string(criteria).unwrap_or_default();
    let key = format!("{}:{}", serialized, started_at.to_rfc3339());
    format!("{:x}", md5::compute(key.as_bytes()))
}

/// Turns search criteria into results using a shared session
#[derive(Debug, Clone)]
pub struct SearchAggregator {
    session: Arc<Session>,
    base_url: String,
    page_size: u32,
}

impl SearchAggregator {
    pub fn new(session: Arc<Session>, base_url: impl Into<String>, page_size: u32) -> Self {
        Self {
            session,
            base_url: base_url.into(),
            page_size,
        }
    }

    /// Configured page size
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Run the search to completion
    pub async fn search(&self, criteria: SearchCriteria) -> Result<SearchResult, ArxivError> {
        let mut paginator = Paginator::new(criteria, self.page_size)?;
        let mut papers = Vec::new();

        while let Some(page) = paginator.next_page(&self.session, &self.base_url).await? {
            papers.extend(page.papers);
        }

        let result = paginator.finish(papers);
        info!(
            "Search {} finished: {} papers of {} in {} pages ({} retries, {:.2}s)",
            result.search_id,
            result.papers.len(),
            result.total_results,
            result.metadata.pages_fetched,
            result.metadata.retries,
            result.metadata.duration.as_secs_f64()
        );
        Ok(result)
    }

    /// Stream the search one page at a time.
    ///
    /// The stream ends after the last page; an error is yielded once and ends
    /// the stream.
    pub fn pages(
        &self,
        criteria: SearchCriteria,
    ) -> impl Stream<Item = Result<SearchPage, ArxivError>> + '_ {
        stream! {
            match Paginator::new(criteria, self.page_size) {
                Err(e) => yield Err(e),
                Ok(mut paginator) => loop {
                    match paginator.next_page(&self.session, &self.base_url).await {
                        Ok(Some(page)) => yield Ok(page),
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                },
            }
        }
    }
}
