//! Core data models for papers, searches and downloads.

mod download;
mod paper;
mod search;

pub use download::{DownloadOutcome, DownloadReport, TaskState, TrackerSnapshot};
pub use paper::{PaperBuilder, PaperRecord};
pub use search::{SearchCriteria, SearchMetadata, SearchPage, SearchResult, SortBy, SortOrder};
