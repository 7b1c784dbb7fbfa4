//! `monitor`/`await` (spec §4.5): poll one task to completion, streaming
//! new output and reporting on-change progress, with a timeout.
//!
//! Callers holding a `LazyTaskId` must expand it to a real `TaskId`
//! first (spec §4.5: "if taskId is a LazyTask id, expand it first") —
//! that step lives in [`crate::facade::Runtime`], which owns the
//! `LazyTaskTable` needed to spawn it; this module only ever polls
//! already-real ids, keeping the polling loop decoupled from spawning.

use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::TaskdeferError;
use crate::id::TaskId;
use crate::status::{FsStatusStore, TaskState, TaskStatus};

/// Default poll interval, spec §4.5 ("default every 10 ms").
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll (or, if `watch` wakes us, wait on) `task_id` until it reaches a
/// terminal state or `timeout_secs` elapses.
///
/// `on_progress` is invoked only when the observed status has
/// structurally changed (spec §4.5); `on_output` receives each newly
/// produced slice of the `output` field exactly once, never duplicated.
pub async fn monitor(
    store: &FsStatusStore,
    clock: &dyn Clock,
    task_id: &TaskId,
    timeout_secs: f64,
    poll_interval: Duration,
    mut on_progress: impl FnMut(&TaskStatus),
    mut on_output: impl FnMut(&str),
) -> TaskStatus {
    let deadline = if timeout_secs > 0.0 {
        Some(Instant::now() + Duration::from_secs_f64(timeout_secs))
    } else {
        None
    };

    let mut last: Option<TaskStatus> = None;
    let mut streamed_output = String::new();

    loop {
        let current = store.read(task_id);

        let changed = match &last {
            Some(prev) => !prev.observably_equal(&current),
            None => true,
        };
        if changed {
            on_progress(&current);
        }

        if let Some(output) = &current.output {
            if let Some(new_suffix) = output.strip_prefix(streamed_output.as_str()) {
                if !new_suffix.is_empty() {
                    on_output(new_suffix);
                }
                streamed_output = output.clone();
            } else if *output != streamed_output {
                // Output diverged from what we'd streamed (e.g. truncation
                // shifted the window); emit the whole current value rather
                // than guess at a diff.
                on_output(output);
                streamed_output = output.clone();
            }
        }

        last = Some(current.clone());

        if current.status.is_terminal() {
            return current;
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                let mut timed_out = current;
                timed_out.timeout = true;
                timed_out.message = format!("timed out after {timeout_secs}s");
                return timed_out;
            }
        }

        let _ = clock;
        tokio::time::sleep(poll_interval).await;
    }
}

/// `await_task` (spec §4.5): wraps [`monitor`] and resolves to the
/// task's `result` on success, or a descriptive error otherwise.
pub async fn await_task(
    store: &FsStatusStore,
    clock: &dyn Clock,
    task_id: &TaskId,
    timeout_secs: f64,
    poll_interval: Duration,
) -> Result<serde_json::Value, TaskdeferError> {
    let status = monitor(store, clock, task_id, timeout_secs, poll_interval, |_| {}, |_| {}).await;
    resolve(task_id, timeout_secs, status)
}

pub(crate) fn resolve(
    task_id: &TaskId,
    timeout_secs: f64,
    status: TaskStatus,
) -> Result<serde_json::Value, TaskdeferError> {
    if status.timeout {
        return Err(TaskdeferError::Timeout {
            task_id: task_id.clone(),
            timeout_secs,
        });
    }
    match status.status {
        TaskState::Completed => Ok(status.result.unwrap_or(serde_json::Value::Null)),
        TaskState::Error => Err(TaskdeferError::WorkerRuntime {
            task_id: task_id.clone(),
            message: status.error_message.unwrap_or_else(|| "unknown error".to_string()),
        }),
        other => Err(TaskdeferError::WorkerRuntime {
            task_id: task_id.clone(),
            message: format!("task ended in unexpected state {other:?}: {}", status.message),
        }),
    }
}
