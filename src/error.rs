//! Crate-wide error types.
//!
//! Mirrors the aggregation pattern of `tasker-client`'s `ClientError`: each
//! subsystem gets its own `thiserror` enum, and `TaskdeferError` collects
//! them with `#[from]` so call sites can use `?` without manual mapping.

use thiserror::Error;

use crate::id::TaskId;

/// Top-level error type returned by the public API.
#[derive(Debug, Error)]
pub enum TaskdeferError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("background task {task_id} failed: {message}")]
    WorkerRuntime {
        task_id: TaskId,
        message: String,
    },

    #[error("timed out waiting for task {task_id} after {timeout_secs}s")]
    Timeout { task_id: TaskId, timeout_secs: f64 },

    #[error("defer callback failed: {0}")]
    DeferCallback(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TaskdeferError>;

/// Failure of the `CallbackCapture` subsystem (spec §4.1).
///
/// Always fatal to the *spawn attempt* that triggered it — the runtime
/// never falls back to running the callback in-process, since that would
/// change observable semantics without telling the caller.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no capture strategy recognizes this callable (tried all variants in priority order)")]
    NoStrategyMatched,

    #[error("callable registered under name {0:?} was not found in the task registry")]
    UnknownName(String),

    #[error("context serialization failed: {0}")]
    ContextSerialization(#[from] serde_json::Error),

    #[error("hydration file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("captured value contains unescaped non-printable bytes and cannot survive a file round-trip")]
    UnprintableBytes,

    #[error("the unverified fallback serializer is disabled; pass CaptureOptions::allow_unverified(true) to enable it for tests")]
    UnverifiedDisabled,
}

/// Failure to launch a detached worker process (spec §4.2 ProcessSpawner).
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("refusing to spawn a background task from within a worker process (BACKGROUND_PROCESS=1 is set)")]
    ReentrantSpawn,

    #[error("OS process spawn failed: {0}")]
    Os(#[from] std::io::Error),

    #[error("worker exited immediately with status {0:?} before reaching RUNNING")]
    ImmediateExit(Option<i32>),
}

/// Failure reading or writing the filesystem-backed status channel.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status directory {0:?} could not be created")]
    DirectoryCreate(std::path::PathBuf, #[source] std::io::Error),

    #[error("failed to atomically write status for task {0}")]
    AtomicWrite(TaskId, #[source] std::io::Error),

    #[error("failed to read status file for task {0}")]
    Read(TaskId, #[source] std::io::Error),

    #[error("watcher setup failed: {0}")]
    Watch(#[from] notify::Error),
}

/// Failure from a `Joiner` (`all`/`allSettled`/pool) invocation.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("task {key:?} ({task_id}) failed: {message}")]
    TaskFailed {
        key: String,
        task_id: TaskId,
        message: String,
    },

    #[error("task {key:?} ({task_id}) has no status record")]
    TaskNotFound { key: String, task_id: TaskId },

    #[error("join timed out after {timeout_secs}s; still pending: {pending:?}")]
    Timeout {
        timeout_secs: f64,
        pending: Vec<(String, TaskId)>,
    },

    #[error("pool-routed input cannot mix already-spawned TaskIds with lazy/raw callables; expand {0:?} yourself first")]
    MixedPoolInput(String),

    #[error("failed to spawn task for key {key:?}: {source}")]
    SpawnFailed {
        key: String,
        #[source]
        source: SpawnError,
    },
}

/// Failure loading the `Config` record (spec §6).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
