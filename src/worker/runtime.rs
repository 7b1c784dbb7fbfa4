//! The `WorkerScript` behaviors (spec §4.2): hydrate, run, write status,
//! self-delete. [`run`] is the whole lifecycle of one worker invocation;
//! `src/bin/worker.rs` is a thin binary wrapper around it.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::status::{FsStatusStore, TaskState, TaskStatus};
use crate::worker::HydrationFile;

/// Exit code convention: 0 on `COMPLETED`, non-zero on anything else
/// (spec §4.2 step 9: "Always exit non-zero on error, zero on success").
pub async fn run(hydration_path: &Path) -> i32 {
    let clock = SystemClock;

    let hydration = match HydrationFile::read_from(hydration_path) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, path = ?hydration_path, "failed to read hydration file");
            return 1;
        }
    };

    let store = match FsStatusStore::new(&hydration.status_directory) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open status directory");
            return 1;
        }
    };

    let exit_code = run_hydrated(&clock, &store, hydration);
    let _ = std::fs::remove_file(hydration_path);
    exit_code
}

fn run_hydrated(clock: &dyn Clock, store: &FsStatusStore, hydration: HydrationFile) -> i32 {
    let task_id = hydration.task_id.clone();

    if hydration.bootstrap_framework {
        // No host framework is re-specified by this crate (spec §1
        // Out-of-scope); bootstrap is a documented no-op that never
        // fails, matching step 4's "failures here MUST NOT be fatal".
        tracing::debug!("framework bootstrap: nothing to do (no host framework integration)");
    }

    if let Err(e) = hydration.capture.callable.verify_callable() {
        write_spawn_error(clock, store, &task_id, &format!("callable failed verification: {e}"));
        return 1;
    }

    let mut running = store.read(&task_id);
    running.status = TaskState::Running;
    running.pid = Some(std::process::id());
    running.message = "running".to_string();
    if let Err(e) = store.update(clock, &task_id, running) {
        tracing::error!(error = %e, "failed to write RUNNING status");
    }

    if let Some(bytes) = hydration.memory_limit_bytes {
        apply_memory_limit(bytes);
    }

    let started = Instant::now();
    let timeout = if hydration.timeout_seconds == 0 {
        None
    } else {
        Some(Duration::from_secs(hydration.timeout_seconds))
    };

    let (outcome, output, timed_out) = invoke_with_timeout(hydration.capture, timeout, started);

    let duration = started.elapsed().as_secs_f64();
    match outcome {
        Ok(result) => write_completed(clock, store, &task_id, result, duration, output),
        Err(message) => {
            write_error(clock, store, &task_id, &message, Some(duration), Some(output));
            if timed_out {
                // The callable's thread is still running and detached; there
                // is no in-band cancellation (spec §5), so the only way to
                // honor the configured wall-time limit is for this process
                // to exit now rather than block joining that thread.
                std::process::exit(1);
            }
            return 1;
        }
    }
    0
}

/// Runs the callable on its own thread, capturing stdout/stderr on
/// platforms where fd redirection is supported (spec §4.2 step 6), and
/// enforcing `timeout` by *not waiting* for that thread past the limit
/// rather than attempting to cancel it (spec §5: "no in-band
/// cancellation channel to a running worker").
fn invoke_with_timeout(
    capture: crate::capture::Capture,
    timeout: Option<Duration>,
    started: Instant,
) -> (Result<serde_json::Value, String>, String, bool) {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let ctx = capture.context.clone();
        let (result, output) = capture_output(|| capture.callable.invoke(&ctx));
        let _ = tx.send((result, output));
    });

    match timeout {
        None => {
            let (result, output) = rx
                .recv()
                .unwrap_or_else(|_| (Err("worker thread disconnected".to_string()), String::new()));
            (result, output, false)
        }
        Some(limit) => {
            let remaining = limit.saturating_sub(started.elapsed());
            match rx.recv_timeout(remaining) {
                Ok((result, output)) => (result, output, false),
                Err(_) => (
                    Err(format!("task exceeded configured timeout of {}s", limit.as_secs())),
                    String::new(),
                    true,
                ),
            }
        }
    }
}

#[cfg(unix)]
fn capture_output<T>(f: impl FnOnce() -> T) -> (T, String) {
    use std::io::{Read, Seek, SeekFrom};
    use std::os::unix::io::AsRawFd;

    let Ok(mut tmp) = tempfile::tempfile() else {
        return (f(), String::new());
    };
    let tmp_fd = tmp.as_raw_fd();

    // SAFETY: dup/dup2 are plain syscalls; we restore the original fds
    // in every path below before returning, including on panic via the
    // guard's Drop impl.
    let result = unsafe {
        let saved_out = libc_dup(1);
        let saved_err = libc_dup(2);
        libc_dup2(tmp_fd, 1);
        libc_dup2(tmp_fd, 2);
        let guard = RestoreFds { saved_out, saved_err };
        let value = f();
        drop(guard);
        value
    };

    let mut buf = String::new();
    let _ = tmp.seek(SeekFrom::Start(0));
    let _ = tmp.read_to_string(&mut buf);
    (result, buf)
}

#[cfg(unix)]
struct RestoreFds {
    saved_out: i32,
    saved_err: i32,
}

#[cfg(unix)]
impl Drop for RestoreFds {
    fn drop(&mut self) {
        // SAFETY: restoring previously-duplicated valid fds onto 1/2.
        unsafe {
            libc_dup2(self.saved_out, 1);
            libc_dup2(self.saved_err, 2);
            libc_close(self.saved_out);
            libc_close(self.saved_err);
        }
    }
}

#[cfg(unix)]
unsafe fn libc_dup(fd: i32) -> i32 {
    nix::unistd::dup(fd).unwrap_or(fd)
}

#[cfg(unix)]
unsafe fn libc_dup2(from: i32, to: i32) {
    let _ = nix::unistd::dup2(from, to);
}

#[cfg(unix)]
unsafe fn libc_close(fd: i32) {
    let _ = nix::unistd::close(fd);
}

#[cfg(not(unix))]
fn capture_output<T>(f: impl FnOnce() -> T) -> (T, String) {
    // stdout/stderr fd redirection is a Unix-specific technique; on other
    // platforms the callable still runs, it's just that output streaming
    // (spec §4.2 step 6) is unavailable.
    (f(), String::new())
}

/// Caps this worker process's address-space size so a runaway callable
/// can't exhaust host memory (spec §4.2 step 2's "configurable memory
/// cap"); applies to the whole process, which runs exactly one callable.
#[cfg(unix)]
fn apply_memory_limit(bytes: u64) {
    use nix::sys::resource::{setrlimit, Resource};
    if let Err(e) = setrlimit(Resource::RLIMIT_AS, bytes, bytes) {
        tracing::warn!(error = %e, bytes, "failed to set memory rlimit");
    }
}

#[cfg(not(unix))]
fn apply_memory_limit(_bytes: u64) {
    // RLIMIT_AS has no portable equivalent off Unix; the cap goes
    // unenforced there, matching spawn.rs's platform-gated treatment of
    // other OS-level process controls.
}

fn write_completed(
    clock: &dyn Clock,
    store: &FsStatusStore,
    task_id: &crate::id::TaskId,
    result: serde_json::Value,
    duration: f64,
    output: String,
) {
    let mut status = store.read(task_id);
    status.status = TaskState::Completed;
    status.message = "completed".to_string();
    status.duration = duration;
    status.result_type = Some(json_type_name(&result).to_string());

    let result_str = result.to_string();
    let (truncated_result, result_truncated, _) = TaskStatus::truncate_output(&result_str);
    status.result = if result_truncated {
        Some(serde_json::Value::String(truncated_result))
    } else {
        Some(result)
    };
    status.result_truncated = result_truncated;

    apply_output(&mut status, output);
    if let Err(e) = store.update(clock, task_id, status) {
        tracing::error!(error = %e, "failed to write COMPLETED status");
    }
}

fn write_error(
    clock: &dyn Clock,
    store: &FsStatusStore,
    task_id: &crate::id::TaskId,
    message: &str,
    duration: Option<f64>,
    output: Option<String>,
) {
    let mut status = store.read(task_id);
    status.status = TaskState::Error;
    status.message = "error".to_string();
    status.error_message = Some(message.to_string());
    if let Some(d) = duration {
        status.duration = d;
    }
    if let Some(output) = output {
        apply_output(&mut status, output);
    }
    if let Err(e) = store.update(clock, task_id, status) {
        tracing::error!(error = %e, "failed to write ERROR status");
    }
}

/// Writes `SpawnError`, the only state `Pending` may legally transition to
/// directly (`TaskState::can_transition_to`) — used when the callable fails
/// verification before `RUNNING` is ever written.
fn write_spawn_error(
    clock: &dyn Clock,
    store: &FsStatusStore,
    task_id: &crate::id::TaskId,
    message: &str,
) {
    let mut status = store.read(task_id);
    status.status = TaskState::SpawnError;
    status.message = "spawn_error".to_string();
    status.error_message = Some(message.to_string());
    if let Err(e) = store.update(clock, task_id, status) {
        tracing::error!(error = %e, "failed to write SPAWN_ERROR status");
    }
}

fn apply_output(status: &mut TaskStatus, output: String) {
    if output.is_empty() {
        return;
    }
    let (truncated, was_truncated, len) = TaskStatus::truncate_output(&output);
    status.output = Some(truncated);
    status.result_truncated = status.result_truncated || was_truncated;
    status.result_length = Some(len);
}

fn json_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{callable, Capture, Context};
    use crate::clock::SystemClock;
    use crate::id::TaskId;
    use serde_json::json;

    fn greet(ctx: &Context) -> Result<serde_json::Value, String> {
        let name = ctx.get("name").and_then(|v| v.as_str()).unwrap_or("world");
        Ok(json!(format!("hello {name}")))
    }

    fn boom(_ctx: &Context) -> Result<serde_json::Value, String> {
        Err("boom".to_string())
    }

    fn store_dir() -> (FsStatusStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FsStatusStore::new(dir.path()).unwrap(), dir)
    }

    #[test]
    fn completed_task_records_result_and_duration() {
        callable::register_named("taskdefer_test::greet", greet);
        let (store, _dir) = store_dir();
        let clock = SystemClock;
        let id = TaskId::generate(&clock);
        store.create_initial(&clock, &id, "named", 1).unwrap();

        let mut ctx = Context::new();
        ctx.insert("name".into(), json!("rust"));
        let capture = Capture::named("taskdefer_test::greet", ctx).unwrap();
        let hydration = HydrationFile {
            task_id: id.clone(),
            capture,
            status_directory: store.directory().to_path_buf(),
            memory_limit_bytes: None,
            timeout_seconds: 0,
            bootstrap_framework: true,
        };

        let code = run_hydrated(&clock, &store, hydration);
        assert_eq!(code, 0);
        let status = store.read(&id);
        assert_eq!(status.status, TaskState::Completed);
        assert_eq!(status.result, Some(json!("hello rust")));
    }

    #[test]
    fn failing_callable_writes_error_status_and_nonzero_exit() {
        callable::register_named("taskdefer_test::boom", boom);
        let (store, _dir) = store_dir();
        let clock = SystemClock;
        let id = TaskId::generate(&clock);
        store.create_initial(&clock, &id, "named", 0).unwrap();

        let capture = Capture::named("taskdefer_test::boom", Context::new()).unwrap();
        let hydration = HydrationFile {
            task_id: id.clone(),
            capture,
            status_directory: store.directory().to_path_buf(),
            memory_limit_bytes: None,
            timeout_seconds: 0,
            bootstrap_framework: true,
        };

        let code = run_hydrated(&clock, &store, hydration);
        assert_eq!(code, 1);
        let status = store.read(&id);
        assert_eq!(status.status, TaskState::Error);
        assert_eq!(status.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn unknown_named_callable_fails_verification_before_running() {
        let (store, _dir) = store_dir();
        let clock = SystemClock;
        let id = TaskId::generate(&clock);
        store.create_initial(&clock, &id, "named", 0).unwrap();

        let capture = crate::capture::Capture {
            callable: crate::capture::Callable::Named {
                name: "taskdefer_test::never_registered_xyz".to_string(),
            },
            context: Context::new(),
        };
        let hydration = HydrationFile {
            task_id: id.clone(),
            capture,
            status_directory: store.directory().to_path_buf(),
            memory_limit_bytes: None,
            timeout_seconds: 0,
            bootstrap_framework: true,
        };
        let code = run_hydrated(&clock, &store, hydration);
        assert_eq!(code, 1);
        assert_eq!(store.read(&id).status, TaskState::SpawnError);
    }
}
