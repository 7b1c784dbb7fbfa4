//! Shared hydration-file format between the parent process and the
//! `taskdefer-worker` binary (spec §4.2 WorkerScript: "hydrate the
//! callback, run it, write status, self-delete").
//!
//! A template-generated throwaway script has no idiomatic Rust
//! equivalent; instead, one fixed worker binary is parameterized by a
//! small JSON file describing which task to run (SPEC_FULL.md §3).

pub mod runtime;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capture::Capture;
use crate::error::CaptureError;
use crate::id::TaskId;

/// Everything the worker binary needs to hydrate and run one task. This
/// is the file passed as the worker's sole command-line argument.
#[derive(Debug, Serialize, Deserialize)]
pub struct HydrationFile {
    pub task_id: TaskId,
    pub capture: Capture,
    pub status_directory: PathBuf,
    pub memory_limit_bytes: Option<u64>,
    pub timeout_seconds: u64,
    pub bootstrap_framework: bool,
}

impl HydrationFile {
    pub fn write_to(&self, path: &Path) -> Result<(), CaptureError> {
        let bytes = serde_json::to_vec(self).map_err(CaptureError::ContextSerialization)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, CaptureError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(CaptureError::ContextSerialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{callable, context::Context};

    fn noop(_ctx: &Context) -> Result<serde_json::Value, String> {
        Ok(serde_json::Value::Null)
    }

    #[test]
    fn hydration_file_round_trips_through_disk() {
        callable::register_named("taskdefer_test::hydration_noop", noop);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hydrate.json");
        let capture = Capture::named("taskdefer_test::hydration_noop", Context::new()).unwrap();
        let file = HydrationFile {
            task_id: TaskId::parse("defer_20260101_000000_deadbeef").unwrap(),
            capture,
            status_directory: dir.path().to_path_buf(),
            memory_limit_bytes: Some(512 * 1024 * 1024),
            timeout_seconds: 0,
            bootstrap_framework: true,
        };
        file.write_to(&path).unwrap();
        let restored = HydrationFile::read_from(&path).unwrap();
        assert_eq!(restored.task_id, file.task_id);
        assert_eq!(restored.timeout_seconds, 0);
    }
}
