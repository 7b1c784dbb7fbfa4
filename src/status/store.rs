//! Filesystem-backed `StatusStore` (spec §4.2).
//!
//! Grounded on `turul-mcp-task-storage`'s `TaskStorage` trait for the
//! operation shape (create/read/update/list/cleanup), and on
//! `cortex-act::job_manager`'s file-per-job layout and "cleanup as a
//! side-effect of every call" pattern.

use std::path::{Path, PathBuf};

use crate::clock::Clock;
use crate::error::StatusError;
use crate::id::TaskId;
use crate::status::model::{TaskState, TaskStatus};

/// One `.status` file per task under a configured directory. The only
/// writer of a given file is that task's worker; the parent writes only
/// `PENDING`/`SPAWN_ERROR` (spec §3 ownership, §4.2 contract).
#[derive(Debug, Clone)]
pub struct FsStatusStore {
    directory: PathBuf,
}

impl FsStatusStore {
    pub fn new(directory: impl Into<PathBuf>) -> std::io::Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.directory.join(format!("{task_id}.status"))
    }

    /// Write the initial `PENDING` record at registration time.
    pub fn create_initial(
        &self,
        clock: &dyn Clock,
        task_id: &TaskId,
        callback_kind: &str,
        context_size: usize,
    ) -> Result<(), StatusError> {
        let now = clock.now_utc();
        let mut status =
            TaskStatus::new_pending(task_id.clone(), now.to_rfc3339(), clock.unix_seconds() as f64);
        status
            .extra
            .insert("callback_type".to_string(), callback_kind.into());
        status
            .extra
            .insert("context_size".to_string(), context_size.into());
        self.write_atomic(task_id, &status)
    }

    /// Overwrite the status file atomically: write to a sibling temp file
    /// then rename, so readers never observe a half-written record
    /// (invariant 5).
    pub fn write_atomic(&self, task_id: &TaskId, status: &TaskStatus) -> Result<(), StatusError> {
        let final_path = self.path_for(task_id);
        let tmp_path = self
            .directory
            .join(format!(".{task_id}.status.tmp-{}", fastrand::u64(..)));
        let json = serde_json::to_vec_pretty(status)
            .map_err(|e| StatusError::AtomicWrite(task_id.clone(), std::io::Error::other(e)))?;
        std::fs::write(&tmp_path, &json)
            .map_err(|e| StatusError::AtomicWrite(task_id.clone(), e))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| StatusError::AtomicWrite(task_id.clone(), e))
    }

    /// Apply a state transition, validating it against
    /// [`TaskState::can_transition_to`] before writing. Callers that only
    /// want to refresh `output`/`timestamp` on an unchanged state should
    /// pass the same `status` — that's always allowed.
    pub fn update(
        &self,
        clock: &dyn Clock,
        task_id: &TaskId,
        mut status: TaskStatus,
    ) -> Result<(), StatusError> {
        if let Ok(Some(current)) = self.try_read(task_id) {
            debug_assert!(
                current.status.can_transition_to(status.status),
                "invalid transition {:?} -> {:?} for {task_id}",
                current.status,
                status.status
            );
        }
        status.updated_at = clock.now_utc().to_rfc3339();
        status.timestamp = clock.unix_seconds() as f64;
        self.write_atomic(task_id, &status)
    }

    /// Read a status, producing the synthetic `NOT_FOUND`/`CORRUPTED`
    /// states described in spec §4.2/§4.3 instead of propagating an error
    /// for those two cases.
    pub fn read(&self, task_id: &TaskId) -> TaskStatus {
        match self.try_read(task_id) {
            Ok(Some(status)) => status,
            Ok(None) => TaskStatus::not_found(task_id.clone()),
            Err(_) => TaskStatus::corrupted(task_id.clone(), "status file is not valid JSON"),
        }
    }

    /// `Ok(None)` means missing; `Err` means present-but-unparsable.
    fn try_read(&self, task_id: &TaskId) -> std::io::Result<Option<TaskStatus>> {
        let path = self.path_for(task_id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match serde_json::from_slice::<TaskStatus>(&bytes) {
            Ok(status) => Ok(Some(status)),
            Err(e) => Err(std::io::Error::other(e)),
        }
    }

    /// Enumerate all tasks, sorted by `timestamp` descending.
    pub fn list(&self) -> Vec<TaskStatus> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.directory) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("status") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(task_id) = TaskId::parse(stem.to_string()) else {
                continue;
            };
            out.push(self.read(&task_id));
        }
        out.sort_by(|a, b| b.timestamp.partial_cmp(&a.timestamp).unwrap());
        out
    }

    /// Remove status files older than `max_age` whose current status is
    /// terminal, and orphaned worker hydration files from `temp_dir` older
    /// than `max_age`. Never removes a `RUNNING` record. Returns the count
    /// removed. Idempotent: a second call with no intervening activity
    /// removes nothing.
    pub fn cleanup(
        &self,
        clock: &dyn Clock,
        max_age: std::time::Duration,
        temp_dir: Option<&Path>,
    ) -> usize {
        let mut removed = 0;
        let now = clock.now();
        let Ok(entries) = std::fs::read_dir(&self.directory) else {
            return removed;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("status") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(age) = now.duration_since(meta.modified().unwrap_or(now)) else {
                continue;
            };
            if age < max_age {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(task_id) = TaskId::parse(stem.to_string()) else {
                continue;
            };
            let status = self.read(&task_id);
            if status.status == TaskState::Running {
                continue;
            }
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        if let Some(temp_dir) = temp_dir {
            if let Ok(entries) = std::fs::read_dir(temp_dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let Ok(meta) = entry.metadata() else { continue };
                    let Ok(age) = now.duration_since(meta.modified().unwrap_or(now)) else {
                        continue;
                    };
                    if age >= max_age && std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        removed
    }
}
