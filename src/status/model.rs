//! `TaskStatus` record and state machine (spec §3, §4.3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::TaskId;

/// Output is truncated above this many characters, with `result_truncated`
/// set to flag it (spec §4.2 step 6, §9 design note).
pub const OUTPUT_TRUNCATE_LIMIT: usize = 1000;

/// States a task can be in. `Pending`/`Running`/`Completed`/`Error`/
/// `SpawnError` are written to disk; the remaining variants are synthetic
/// — produced by readers, never persisted (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Error,
    SpawnError,
    /// Synthetic: no status file exists.
    NotFound,
    /// Synthetic: the status file exists but couldn't be parsed.
    Corrupted,
    /// Synthetic: a LazyTask id that was never expanded.
    LazyPending,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::SpawnError)
    }

    pub fn is_synthetic(self) -> bool {
        matches!(self, Self::NotFound | Self::Corrupted | Self::LazyPending)
    }

    /// Whether `self -> next` is an allowed transition per the state
    /// diagram in spec §4.3. Synthetic states never appear as `next`
    /// here — they're never written.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        // Idempotent re-writes of the same state are allowed (e.g. periodic
        // RUNNING updates that only refresh output/timestamp).
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Running) | (Pending, SpawnError) | (Running, Completed) | (Running, Error)
        )
    }
}

/// The persisted, cross-process source-of-truth record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub status: TaskState,
    #[serde(default)]
    pub message: String,

    /// Seconds since epoch, last update.
    pub timestamp: f64,
    /// Fractional seconds of execution time so far / at completion.
    #[serde(default)]
    pub duration: f64,

    #[serde(default)]
    pub memory_usage: Option<u64>,
    #[serde(default)]
    pub memory_peak: Option<u64>,
    #[serde(default)]
    pub pid: Option<u32>,

    pub created_at: String,
    pub updated_at: String,

    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub result_type: Option<String>,
    #[serde(default)]
    pub result_truncated: bool,

    #[serde(default)]
    pub output: Option<String>,
    /// Length of the output actually produced, even when `output` was
    /// truncated for storage — lets consumers request the full stream
    /// through a different mechanism later (§9 design note).
    #[serde(default)]
    pub result_length: Option<usize>,

    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_file: Option<String>,
    #[serde(default)]
    pub error_line: Option<u32>,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub stack_trace: Option<String>,

    /// Reporting-only: set when this status was produced by the
    /// reflection-based fallback serializer, so tests can assert it was
    /// never reached in production use (§9 design note).
    #[serde(default)]
    pub unverified_capture: bool,

    /// Set by [`crate::monitor`] on timeout; never written by a worker.
    #[serde(default)]
    pub timeout: bool,

    /// Unknown fields round-trip losslessly, per spec §6 "readers must
    /// tolerate additional unknown fields".
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskStatus {
    pub fn new_pending(task_id: TaskId, created_at: String, timestamp: f64) -> Self {
        Self {
            task_id,
            status: TaskState::Pending,
            message: "queued".to_string(),
            timestamp,
            duration: 0.0,
            memory_usage: None,
            memory_peak: None,
            pid: None,
            created_at: created_at.clone(),
            updated_at: created_at,
            result: None,
            result_type: None,
            result_truncated: false,
            output: None,
            result_length: None,
            error_message: None,
            error_file: None,
            error_line: None,
            error_code: None,
            stack_trace: None,
            unverified_capture: false,
            timeout: false,
            extra: BTreeMap::new(),
        }
    }

    /// A synthetic status for a task id with no status file on disk.
    pub fn not_found(task_id: TaskId) -> Self {
        let mut s = Self::new_pending(task_id, String::new(), 0.0);
        s.status = TaskState::NotFound;
        s.message = "no status record found".to_string();
        s
    }

    /// A synthetic status for a status file that exists but didn't parse,
    /// per invariant 5: readers must never silently return a half-parsed
    /// record.
    pub fn corrupted(task_id: TaskId, detail: impl Into<String>) -> Self {
        let mut s = Self::new_pending(task_id, String::new(), 0.0);
        s.status = TaskState::Corrupted;
        s.message = detail.into();
        s
    }

    pub fn lazy_pending(task_id: TaskId) -> Self {
        let mut s = Self::new_pending(task_id, String::new(), 0.0);
        s.status = TaskState::LazyPending;
        s.message = "lazy task never expanded".to_string();
        s
    }

    /// Truncate `text` to [`OUTPUT_TRUNCATE_LIMIT`] chars, returning the
    /// truncated text plus whether truncation occurred and the original
    /// length, per spec §4.2 step 6 and §9.
    pub fn truncate_output(text: &str) -> (String, bool, usize) {
        let len = text.chars().count();
        if len <= OUTPUT_TRUNCATE_LIMIT {
            (text.to_string(), false, len)
        } else {
            let truncated: String = text.chars().take(OUTPUT_TRUNCATE_LIMIT).collect();
            (truncated, true, len)
        }
    }

    /// Structural equality used by `monitor`'s "status has changed" check
    /// (spec §4.5) — compares all fields that matter to an observer,
    /// ignoring nothing, since the spec requires detecting *any* change.
    pub fn observably_equal(&self, other: &TaskStatus) -> bool {
        self.status == other.status
            && self.message == other.message
            && self.output == other.output
            && self.result == other.result
            && self.error_message == other.error_message
            && self.pid == other.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_state_machine() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Running));
        assert!(TaskState::Pending.can_transition_to(TaskState::SpawnError));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Error));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Running));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Error.can_transition_to(TaskState::Completed));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Error.is_terminal());
        assert!(TaskState::SpawnError.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
    }

    #[test]
    fn truncates_above_limit_and_reports_original_length() {
        let long = "x".repeat(OUTPUT_TRUNCATE_LIMIT + 50);
        let (truncated, was_truncated, len) = TaskStatus::truncate_output(&long);
        assert!(was_truncated);
        assert_eq!(truncated.chars().count(), OUTPUT_TRUNCATE_LIMIT);
        assert_eq!(len, OUTPUT_TRUNCATE_LIMIT + 50);
    }

    #[test]
    fn short_output_is_not_truncated() {
        let (text, was_truncated, len) = TaskStatus::truncate_output("hello");
        assert_eq!(text, "hello");
        assert!(!was_truncated);
        assert_eq!(len, 5);
    }

    #[test]
    fn unknown_fields_round_trip() {
        let json = r#"{
            "task_id": "defer_20260101_000000_deadbeef",
            "status": "RUNNING",
            "timestamp": 1.0,
            "created_at": "2026-01-01",
            "updated_at": "2026-01-01",
            "some_future_field": 42
        }"#;
        let status: TaskStatus = serde_json::from_str(json).unwrap();
        assert_eq!(
            status.extra.get("some_future_field"),
            Some(&Value::from(42))
        );
        let roundtripped = serde_json::to_string(&status).unwrap();
        assert!(roundtripped.contains("some_future_field"));
    }
}
