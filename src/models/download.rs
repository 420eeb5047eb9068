//! Download outcome and tracker snapshot models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Result of downloading a single artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// The artifact was fetched and written
    Downloaded { path: PathBuf, bytes: u64 },

    /// The destination already existed; nothing was fetched
    Skipped { path: PathBuf },

    /// The fetch or write failed after retries
    Failed { reason: String },

    /// The client was built without a downloader
    Disabled,
}

impl DownloadOutcome {
    /// Downloaded or skipped
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DownloadOutcome::Downloaded { .. } | DownloadOutcome::Skipped { .. }
        )
    }

    /// Destination path on success
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            DownloadOutcome::Downloaded { path, .. } | DownloadOutcome::Skipped { path } => {
                Some(path)
            }
            _ => None,
        }
    }
}

/// Lifecycle of one download task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    InFlight,
    Succeeded { path: PathBuf, skipped: bool },
    Failed { reason: String },
}

impl TaskState {
    /// Whether the task has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded { .. } | TaskState::Failed { .. })
    }
}

/// Point-in-time copy of a download tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    /// Tasks in the batch
    pub total: usize,

    /// Tasks that succeeded (including skips)
    pub completed: usize,

    /// Tasks that failed
    pub failed: usize,

    /// State per paper identifier
    pub tasks: BTreeMap<String, TaskState>,

    /// When the batch started
    pub started_at: DateTime<Utc>,

    /// When the last task finished, if the batch is done
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrackerSnapshot {
    /// Percentage of tasks that reached a final state
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed + self.failed) as f64 / self.total as f64 * 100.0
    }

    /// Identifiers and reasons of failed tasks
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.tasks
            .iter()
            .filter_map(|(id, state)| match state {
                TaskState::Failed { reason } => Some((id.as_str(), reason.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Whether every task reached a final state
    pub fn is_finished(&self) -> bool {
        self.completed + self.failed == self.total
    }
}

/// Result of a batch download request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "tracker", rename_all = "snake_case")]
pub enum DownloadReport {
    /// The client was built without a downloader; no I/O happened
    Disabled,

    /// The batch ran to completion
    Finished(TrackerSnapshot),
}

impl DownloadReport {
    /// The tracker, when the batch ran
    pub fn tracker(&self) -> Option<&TrackerSnapshot> {
        match self {
            DownloadReport::Disabled => None,
            DownloadReport::Finished(snapshot) => Some(snapshot),
        }
    }
}
