//! Durable job spool.
//!
//! Jobs are JSON files moved between three directories of the spool root:
//!
//! ```text
//! <spool>/
//! ├── pending/   # enqueued, waiting for a worker
//! ├── active/    # claimed by a worker
//! └── failed/    # exhausted their retries, with the last error attached
//! ```
//!
//! File names are `{enqueued_at_millis:013}-{uuid}.json`, so a plain name
//! sort gives FIFO order. Claiming is a `rename` from `pending/` to
//! `active/`, which is atomic within one filesystem: two workers racing for
//! the same file see exactly one winner.
//!
//! A worker that dies leaves its job in `active/`;
//! [`SpoolQueue::recover_active`] moves such jobs back to `pending/`.

use crate::pipeline::{ComposeRequest, SeparatorRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const PENDING_DIR: &str = "pending";
const ACTIVE_DIR: &str = "active";
const FAILED_DIR: &str = "failed";

/// Number of job ids listed per state by [`SpoolQueue::status`].
pub const STATUS_SAMPLE: usize = 5;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("spool I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed job file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("job {0} is not active")]
    NotActive(Uuid),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> QueueError + '_ {
    move |source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A unit of work accepted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Job {
    Compose(ComposeRequest),
    ComposeSeparator(SeparatorRequest),
}

impl Job {
    pub fn destination(&self) -> &str {
        match self {
            Job::Compose(r) => &r.destination,
            Job::ComposeSeparator(r) => &r.destination,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Compose(_) => "compose",
            Job::ComposeSeparator(_) => "compose-separator",
        }
    }
}

/// A job as stored in the spool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub job: Job,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedJob {
    fn file_name(&self) -> String {
        format!(
            "{:013}-{}.json",
            self.enqueued_at.timestamp_millis().max(0),
            self.id
        )
    }
}

/// Per-state counts with a few ids from each, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStatus {
    pub pending: usize,
    pub active: usize,
    pub failed: usize,
    pub pending_ids: Vec<Uuid>,
    pub active_ids: Vec<Uuid>,
    pub failed_ids: Vec<Uuid>,
}

/// Spool rooted at a directory.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    root: PathBuf,
}

impl SpoolQueue {
    /// Open the spool, creating its directories if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let queue = Self { root: root.into() };
        for dir in [PENDING_DIR, ACTIVE_DIR, FAILED_DIR] {
            let path = queue.root.join(dir);
            fs::create_dir_all(&path).map_err(io_err(&path))?;
        }
        Ok(queue)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Add a job to `pending/` and return its id.
    pub fn enqueue(&self, job: Job) -> Result<Uuid, QueueError> {
        let queued = QueuedJob {
            id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
            job,
            last_error: None,
        };
        let path = self.dir(PENDING_DIR).join(queued.file_name());
        write_job(&path, &queued)?;
        tracing::info!(id = %queued.id, kind = queued.job.kind(), "job enqueued");
        Ok(queued.id)
    }

    /// Claim the oldest pending job by moving it to `active/`.
    ///
    /// Returns `None` when nothing is pending. Files that vanish between
    /// listing and renaming were claimed by someone else and are skipped.
    pub fn claim_next(&self) -> Result<Option<QueuedJob>, QueueError> {
        for path in list_jobs(&self.dir(PENDING_DIR))? {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = self.dir(ACTIVE_DIR).join(name);
            match fs::rename(&path, &target) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&path)(e)),
            }
            match read_job(&target) {
                Ok(job) => {
                    tracing::debug!(id = %job.id, "job claimed");
                    return Ok(Some(job));
                }
                Err(e) => {
                    tracing::error!(path = %target.display(), error = %e, "unreadable job moved to failed");
                    let failed = self.dir(FAILED_DIR).join(name);
                    fs::rename(&target, &failed).map_err(io_err(&target))?;
                }
            }
        }
        Ok(None)
    }

    /// Remove a successfully processed job from `active/`.
    pub fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let path = self.dir(ACTIVE_DIR).join(job.file_name());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(QueueError::NotActive(job.id)),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Move a job from `active/` to `failed/`, recording `error`.
    pub fn fail(&self, job: &QueuedJob, error: &str) -> Result<(), QueueError> {
        let active = self.dir(ACTIVE_DIR).join(job.file_name());
        if !active.exists() {
            return Err(QueueError::NotActive(job.id));
        }
        let failed = QueuedJob {
            last_error: Some(error.to_string()),
            ..job.clone()
        };
        write_job(&self.dir(FAILED_DIR).join(failed.file_name()), &failed)?;
        fs::remove_file(&active).map_err(io_err(&active))
    }

    /// Delete every pending job. Returns how many were removed.
    pub fn purge(&self) -> Result<usize, QueueError> {
        let mut removed = 0;
        for path in list_jobs(&self.dir(PENDING_DIR))? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path)(e)),
            }
        }
        tracing::info!(removed, "pending jobs purged");
        Ok(removed)
    }

    /// Move jobs left in `active/` by a dead worker back to `pending/`.
    pub fn recover_active(&self) -> Result<usize, QueueError> {
        let mut moved = 0;
        for path in list_jobs(&self.dir(ACTIVE_DIR))? {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = self.dir(PENDING_DIR).join(name);
            fs::rename(&path, &target).map_err(io_err(&path))?;
            moved += 1;
        }
        if moved > 0 {
            tracing::warn!(moved, "requeued jobs left active by a previous worker");
        }
        Ok(moved)
    }

    pub fn status(&self) -> Result<QueueStatus, QueueError> {
        let pending = list_jobs(&self.dir(PENDING_DIR))?;
        let active = list_jobs(&self.dir(ACTIVE_DIR))?;
        let failed = list_jobs(&self.dir(FAILED_DIR))?;
        Ok(QueueStatus {
            pending: pending.len(),
            active: active.len(),
            failed: failed.len(),
            pending_ids: sample_ids(&pending),
            active_ids: sample_ids(&active),
            failed_ids: sample_ids(&failed),
        })
    }
}

/// Job files in `dir`, sorted by name.
fn list_jobs(dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err(dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Ids parsed from file names; no file contents are read.
fn sample_ids(paths: &[PathBuf]) -> Vec<Uuid> {
    paths
        .iter()
        .filter_map(|p| p.file_stem()?.to_str()?.split_once('-'))
        .filter_map(|(_, id)| Uuid::parse_str(id).ok())
        .take(STATUS_SAMPLE)
        .collect()
}

fn read_job(path: &Path) -> Result<QueuedJob, QueueError> {
    let content = fs::read_to_string(path).map_err(io_err(path))?;
    serde_json::from_str(&content).map_err(|source| QueueError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Write via a temporary sibling and rename, so readers never see a
/// partial file.
fn write_job(path: &Path, job: &QueuedJob) -> Result<(), QueueError> {
    let json = serde_json::to_string_pretty(job).map_err(|source| QueueError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))
}
