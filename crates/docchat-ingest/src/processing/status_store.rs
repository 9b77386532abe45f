//! Durable per-file processing status
//!
//! The status document is a single JSON object keyed by filename. Every
//! mutation is a full load, mutate, save cycle under one process-wide lock,
//! so concurrent workers on different files never lose each other's writes.
//! Bookkeeping failures are logged and never propagated to the pipeline.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::types::{FileTask, TaskStatus};

/// Status document contents
pub type StatusMap = BTreeMap<String, FileTask>;

/// JSON-file-backed status store
pub struct StatusStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StatusStore {
    /// Create a store backed by the given file. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full status document.
    ///
    /// A missing file is an empty document. A corrupt file is backed up to
    /// `<file>.bak.<unix_seconds>`, replaced by `{}` and reported as empty.
    pub fn load(&self) -> StatusMap {
        let _guard = self.lock.lock();
        self.load_unlocked()
    }

    /// Atomically overwrite the status document. Failures are logged only.
    pub fn save(&self, tasks: &StatusMap) {
        let _guard = self.lock.lock();
        self.save_unlocked(tasks);
    }

    /// Record a status transition for `filename`, creating the task if needed.
    ///
    /// `progress` is clamped to 100. While the task is in flight, a non-error
    /// update never lowers progress. Log entries are only ever appended.
    pub fn update(
        &self,
        filename: &str,
        status: TaskStatus,
        progress: u32,
        message: Option<&str>,
        error: Option<&str>,
    ) -> FileTask {
        let progress = clamp_progress(progress);
        self.mutate(filename, status, |task| {
            let keep_progress = task.status.is_in_flight() && status != TaskStatus::Error;
            task.progress = if keep_progress {
                task.progress.max(progress)
            } else {
                progress
            };
            task.status = status;

            let now = Utc::now();
            if let Some(message) = message.filter(|m| !m.is_empty()) {
                task.push_message(message, now);
            }
            if let Some(error) = error.filter(|e| !e.is_empty()) {
                task.push_error(error, now);
            }
        })
    }

    /// Start a new processing run: status `processing`, progress 0, fresh start time
    pub fn begin(&self, filename: &str, message: &str) -> FileTask {
        self.mutate(filename, TaskStatus::Processing, |task| {
            let now = Utc::now();
            task.status = TaskStatus::Processing;
            task.progress = 0;
            task.chunk_count = 0;
            task.start_time = now;
            task.push_message(message, now);
        })
    }

    /// Persist the number of chunks stored so far
    pub fn set_chunk_count(&self, filename: &str, chunk_count: usize) -> FileTask {
        self.mutate(filename, TaskStatus::Processing, |task| {
            task.chunk_count = chunk_count;
        })
    }

    pub fn get(&self, filename: &str) -> Option<FileTask> {
        self.load().remove(filename)
    }

    /// Re-queue a file as `pending` with progress 0, keeping its history
    pub fn reset(&self, filename: &str, message: &str) -> Option<FileTask> {
        let _guard = self.lock.lock();
        let mut tasks = self.load_unlocked();
        let task = tasks.get_mut(filename)?;

        let now = Utc::now();
        task.status = TaskStatus::Pending;
        task.progress = 0;
        task.last_updated = Some(now);
        task.push_message(message, now);
        let snapshot = task.clone();

        self.save_unlocked(&tasks);
        Some(snapshot)
    }

    /// Forget a file entirely
    pub fn remove(&self, filename: &str) -> Option<FileTask> {
        let _guard = self.lock.lock();
        let mut tasks = self.load_unlocked();
        let removed = tasks.remove(filename)?;
        self.save_unlocked(&tasks);
        Some(removed)
    }

    fn mutate<F>(&self, filename: &str, initial: TaskStatus, apply: F) -> FileTask
    where
        F: FnOnce(&mut FileTask),
    {
        let _guard = self.lock.lock();
        let mut tasks = self.load_unlocked();

        let now = Utc::now();
        let task = tasks
            .entry(filename.to_string())
            .or_insert_with(|| FileTask::new(initial, 0, now));
        apply(task);
        task.last_updated = Some(now);
        let snapshot = task.clone();

        self.save_unlocked(&tasks);
        snapshot
    }

    fn load_unlocked(&self) -> StatusMap {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StatusMap::new(),
            Err(e) => {
                error!("Error loading status file {}: {}", self.path.display(), e);
                return StatusMap::new();
            }
        };

        if raw.trim().is_empty() {
            return StatusMap::new();
        }

        match serde_json::from_str::<StatusMap>(&raw) {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Error loading status file {}: {}", self.path.display(), e);
                warn!("Creating a new empty status file due to corruption");
                self.recover_corrupt();
                StatusMap::new()
            }
        }
    }

    fn recover_corrupt(&self) {
        let backup = backup_path(&self.path);
        match std::fs::copy(&self.path, &backup) {
            Ok(_) => info!("Backed up corrupted status file to {}", backup.display()),
            Err(e) => error!("Failed to back up corrupted status file: {}", e),
        }
        self.save_unlocked(&StatusMap::new());
    }

    fn save_unlocked(&self, tasks: &StatusMap) {
        if let Err(e) = self.write_atomic(tasks) {
            error!("Error saving status file {}: {}", self.path.display(), e);
        }
    }

    fn write_atomic(&self, tasks: &StatusMap) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut temp, tasks)?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|e| Error::StatusStore(format!("Failed to replace status file: {}", e)))?;
        Ok(())
    }
}

fn clamp_progress(progress: u32) -> u8 {
    u8::try_from(progress.min(100)).unwrap_or(100)
}

fn backup_path(path: &Path) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".bak.{}", secs));
    PathBuf::from(name)
}
