//! PDF download manager.
//!
//! Downloads share the client's session, so they count against the same
//! concurrency cap and rate limiter as search requests and reuse its retry
//! policy. Each artifact is streamed into `<dest>.part` and renamed into
//! place once the body is complete; a partial file is removed on failure or
//! cancellation, so an existing destination always means a finished download.

use chrono::Utc;
use futures_util::{stream, StreamExt};
use reqwest::Response;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::ArxivError;
use crate::models::{DownloadOutcome, PaperRecord, TaskState, TrackerSnapshot};
use crate::utils::{override_file_name, paper_file_name, AttemptError, Session};

const PART_SUFFIX: &str = "part";

/// Progress of one download batch.
///
/// All mutation happens under one lock, so counters and task states change
/// together and `completed + failed <= total` holds in every snapshot.
#[derive(Debug)]
pub struct DownloadTracker {
    state: Mutex<TrackerSnapshot>,
}

impl DownloadTracker {
    /// Create a tracker with every identifier queued
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let tasks: BTreeMap<String, TaskState> = ids
            .into_iter()
            .map(|id| (id.to_string(), TaskState::Queued))
            .collect();
        Self {
            state: Mutex::new(TrackerSnapshot {
                total: tasks.len(),
                completed: 0,
                failed: 0,
                tasks,
                started_at: Utc::now(),
                finished_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerSnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a task as in flight
    pub fn start(&self, id: &str) {
        let mut state = self.lock();
        if let Some(task) = state.tasks.get_mut(id) {
            if !task.is_terminal() {
                *task = TaskState::InFlight;
            }
        }
    }

    /// Record a task's outcome; repeated calls for the same task are ignored
    pub fn finish(&self, id: &str, outcome: &DownloadOutcome) {
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return;
        };
        if task.is_terminal() {
            return;
        }

        let succeeded = match outcome {
            DownloadOutcome::Downloaded { path, .. } => {
                *task = TaskState::Succeeded {
                    path: path.clone(),
                    skipped: false,
                };
                true
            }
            DownloadOutcome::Skipped { path } => {
                *task = TaskState::Succeeded {
                    path: path.clone(),
                    skipped: true,
                };
                true
            }
            DownloadOutcome::Failed { reason } => {
                *task = TaskState::Failed {
                    reason: reason.clone(),
                };
                false
            }
            DownloadOutcome::Disabled => {
                *task = TaskState::Failed {
                    reason: "downloader disabled".to_string(),
                };
                false
            }
        };

        if succeeded {
            state.completed += 1;
        } else {
            state.failed += 1;
        }
        if state.completed + state.failed == state.total {
            state.finished_at = Some(Utc::now());
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.lock().clone()
    }
}

/// Removes a partially written file unless disarmed
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!("Removed partial download {}", self.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove partial download {}: {}", self.path.display(), e),
            }
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(PART_SUFFIX);
    dest.with_file_name(name)
}

/// Create `dir` if needed and check that files can be written into it
pub fn ensure_writable(dir: &Path) -> Result<(), ArxivError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        ArxivError::Configuration(format!(
            "cannot create download directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let probe = dir.join(format!(".{}-probe-{}", env!("CARGO_PKG_NAME"), std::process::id()));
    std::fs::write(&probe, b"").map_err(|e| {
        ArxivError::Configuration(format!(
            "download directory {} is not writable: {}",
            dir.display(),
            e
        ))
    })?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

async fn write_body(mut response: Response, part: PathBuf) -> Result<u64, AttemptError> {
    let mut file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| AttemptError::Fatal(ArxivError::Io(e)))?;

    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(AttemptError::from_reqwest)? {
        file.write_all(&chunk)
            .await
            .map_err(|e| AttemptError::Fatal(ArxivError::Io(e)))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| AttemptError::Fatal(ArxivError::Io(e)))?;
    Ok(written)
}

/// Fetches paper PDFs into one directory
#[derive(Debug, Clone)]
pub struct Downloader {
    session: Arc<Session>,
    dir: PathBuf,
}

impl Downloader {
    /// Create a downloader writing into `dir`, which must be writable
    pub fn new(session: Arc<Session>, dir: impl Into<PathBuf>) -> Result<Self, ArxivError> {
        let dir = dir.into();
        ensure_writable(&dir)?;
        info!("Downloads enabled, writing to {}", dir.display());
        Ok(Self { session, dir })
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Destination path for a paper, honoring a caller-supplied file name
    pub fn destination(&self, paper: &PaperRecord, filename: Option<&str>) -> PathBuf {
        let name = filename
            .and_then(override_file_name)
            .unwrap_or_else(|| paper_file_name(paper));
        self.dir.join(name)
    }

    /// Download one paper's PDF; never fails outright
    pub async fn download_one(&self, paper: &PaperRecord, filename: Option<&str>) -> DownloadOutcome {
        let dest = self.destination(paper, filename);
        match self.fetch(paper, &dest).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Download of {} failed: {}", paper.id, e);
                DownloadOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn fetch(&self, paper: &PaperRecord, dest: &Path) -> Result<DownloadOutcome, ArxivError> {
        if tokio::fs::try_exists(dest).await? {
            debug!("{} already present at {}, skipping", paper.id, dest.display());
            return Ok(DownloadOutcome::Skipped {
                path: dest.to_path_buf(),
            });
        }

        let url = paper
            .pdf_url
            .as_deref()
            .ok_or_else(|| ArxivError::Download(format!("no PDF link for {}", paper.id)))?;

        let part = part_path(dest);
        let mut guard = PartFile::new(part.clone());

        let fetched = self
            .session
            .execute(url, &[], |response| write_body(response, part.clone()))
            .await?;

        tokio::fs::rename(&part, dest).await?;
        guard.disarm();

        info!(
            "Downloaded {} ({} bytes, {} attempts) to {}",
            paper.id,
            fetched.value,
            fetched.attempts,
            dest.display()
        );
        Ok(DownloadOutcome::Downloaded {
            path: dest.to_path_buf(),
            bytes: fetched.value,
        })
    }

    /// Download every paper, reporting into `tracker`.
    ///
    /// Papers whose identifier was already seen in `papers` are ignored. At
    /// most `max_concurrent_requests` downloads run at once; a failure is
    /// recorded and never cancels the others.
    pub async fn download_with_tracker(&self, papers: &[PaperRecord], tracker: &DownloadTracker) {
        let mut seen = HashSet::new();
        let unique: Vec<&PaperRecord> = papers
            .iter()
            .filter(|p| seen.insert(p.id.as_str()))
            .collect();

        stream::iter(unique)
            .map(|paper| async move {
                tracker.start(&paper.id);
                let outcome = self.download_one(paper, None).await;
                tracker.finish(&paper.id, &outcome);
            })
            .buffer_unordered(self.session.max_concurrent())
            .collect::<Vec<()>>()
            .await;
    }

    /// Download every paper and return the final tracker state
    pub async fn download_all(&self, papers: &[PaperRecord]) -> TrackerSnapshot {
        let tracker = DownloadTracker::new(papers.iter().map(|p| p.id.as_str()));
        self.download_with_tracker(papers, &tracker).await;

        let snapshot = tracker.snapshot();
        info!(
            "Download batch finished: {} of {} succeeded, {} failed",
            snapshot.completed, snapshot.total, snapshot.failed
        );
        snapshot
    }
}
