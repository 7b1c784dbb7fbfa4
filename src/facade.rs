//! `Runtime`: the single entry point host code and the public API module
//! functions go through (design note §9: "Cyclic references between
//! Process, Defer, and handlers" resolved by a facade that owns every
//! subsystem and hands out narrow references instead of letting them
//! depend on each other directly).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::capture::Capture;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{SpawnError, TaskdeferError};
use crate::id::{LazyTaskId, TaskId};
use crate::lazy::LazyTaskTable;
use crate::log::{Level, TaskLog};
use crate::monitor::{self, DEFAULT_POLL_INTERVAL};
use crate::registry::TaskRegistry;
use crate::spawn::{DetachedProcessSpawner, ProcessSpawner};
use crate::status::{FsStatusStore, TaskStatus};
use crate::worker::HydrationFile;

/// Everything a host needs to spawn, monitor, and join background tasks,
/// bundled so call sites never have to wire the subsystems together
/// themselves.
pub struct Runtime {
    store: FsStatusStore,
    registry: TaskRegistry,
    lazy_table: LazyTaskTable,
    spawner: Arc<dyn ProcessSpawner>,
    clock: Arc<dyn Clock>,
    config: Config,
    log: Option<TaskLog>,
    worker_bin: PathBuf,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("worker_bin", &self.worker_bin)
            .field("status_directory", &self.store.directory())
            .finish()
    }
}

impl Runtime {
    /// Build a runtime from `config`, discovering the worker binary as a
    /// sibling of the current executable named `taskdefer-worker` (the
    /// same-directory convention `cargo build` produces for a workspace's
    /// bin targets).
    ///
    /// Returns `anyhow::Result` rather than this crate's own
    /// [`crate::error::TaskdeferError`]: this is the one boundary function
    /// a host's own `main` is expected to call directly and propagate with
    /// `?`, so it speaks the host's error-handling idiom rather than the
    /// library's typed one.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        use anyhow::Context;
        let store = FsStatusStore::new(&config.temp_directory)
            .with_context(|| format!("creating status directory {:?}", config.temp_directory))?;
        let log = if config.logging.enabled {
            Some(
                TaskLog::new(&config.logging.directory)
                    .with_context(|| format!("creating log directory {:?}", config.logging.directory))?,
            )
        } else {
            None
        };
        Ok(Self {
            store,
            registry: TaskRegistry::new(),
            lazy_table: LazyTaskTable::new(),
            spawner: Arc::new(DetachedProcessSpawner),
            clock: Arc::new(SystemClock),
            worker_bin: worker_binary_path(),
            config,
            log,
        })
    }

    /// The process-wide default instance, built lazily from [`Config::load`]
    /// the first time it's needed. Most hosts should use this rather than
    /// constructing their own `Runtime`; tests construct one directly with
    /// a scoped `Config` and a `RecordingSpawner` instead.
    pub fn global() -> &'static Runtime {
        static INSTANCE: OnceCell<Runtime> = OnceCell::new();
        INSTANCE.get_or_init(|| {
            Runtime::new(Config::load()).expect("failed to initialize default taskdefer runtime")
        })
    }

    pub fn status_store(&self) -> &FsStatusStore {
        &self.store
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn lazy_table(&self) -> &LazyTaskTable {
        &self.lazy_table
    }

    /// Spawn `capture` as a detached worker process right away (spec §4.2
    /// steps 1-4): mint a `TaskId`, write the `PENDING` status record and
    /// hydration file, launch the worker, and record what we know of it
    /// in the in-process registry.
    pub fn spawn(&self, capture: Capture) -> Result<TaskId, SpawnError> {
        if crate::spawn::is_reentrant() {
            return Err(SpawnError::ReentrantSpawn);
        }

        let task_id = TaskId::generate(self.clock.as_ref());
        let kind = capture.kind_tag();
        let context_size = capture.context_size();

        self.store
            .create_initial(self.clock.as_ref(), &task_id, kind, context_size)
            .map_err(|e| SpawnError::Os(std::io::Error::other(e)))?;

        let hydration_path = self
            .config
            .temp_directory
            .join(format!("{task_id}.hydrate.json"));
        let hydration = HydrationFile {
            task_id: task_id.clone(),
            capture,
            status_directory: self.store.directory().to_path_buf(),
            memory_limit_bytes: self.config.process.memory_limit_bytes(),
            timeout_seconds: self.config.process.timeout_seconds,
            bootstrap_framework: self.config.bootstrap_framework,
        };
        hydration
            .write_to(&hydration_path)
            .map_err(|e| SpawnError::Os(std::io::Error::other(e)))?;

        match self.spawner.spawn_worker(&self.worker_bin, &hydration_path) {
            Ok(pid) => {
                self.registry
                    .insert(task_id.clone(), self.clock.now_utc(), kind, context_size);
                self.registry.record_pid(&task_id, pid);
                self.log_event(Level::Info, task_id.as_str(), "spawned");
                Ok(task_id)
            }
            Err(e) => {
                let mut status = self.store.read(&task_id);
                status.status = crate::status::TaskState::SpawnError;
                status.message = "failed to spawn worker process".to_string();
                status.error_message = Some(e.to_string());
                let _ = self.store.update(self.clock.as_ref(), &task_id, status);
                self.log_event(Level::Error, task_id.as_str(), &format!("spawn failed: {e}"));
                Err(e)
            }
        }
    }

    /// Register `capture` without spawning it yet, returning a `lazy_<n>`
    /// handle (spec §3 LazyTask).
    pub fn register_lazy(&self, capture: Capture) -> LazyTaskId {
        self.lazy_table.register(capture)
    }

    /// Spawn a lazy handle's underlying capture exactly once (spec
    /// invariant 6), returning the real `TaskId` whether this call
    /// triggered the spawn or a previous one did.
    pub fn expand_lazy(&self, id: &LazyTaskId) -> Result<TaskId, SpawnError> {
        self.lazy_table.expand(id, |capture| self.spawn(capture))
    }

    pub fn status(&self, task_id: &TaskId) -> TaskStatus {
        self.store.read(task_id)
    }

    pub fn list(&self) -> Vec<TaskStatus> {
        self.store.list()
    }

    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.store
            .cleanup(self.clock.as_ref(), max_age, Some(&self.config.temp_directory))
    }

    /// `monitor`/`await` (spec §4.5), expanding `id` first if it's a
    /// lazy handle — the one place this crate couples lazy expansion to
    /// polling, since only the facade holds both tables.
    pub async fn await_any(
        &self,
        id: &crate::id::AnyTaskRef,
        timeout_secs: f64,
    ) -> Result<serde_json::Value, TaskdeferError> {
        let task_id = self.resolve_any(id)?;
        monitor::await_task(&self.store, self.clock.as_ref(), &task_id, timeout_secs, DEFAULT_POLL_INTERVAL)
            .await
            .map_err(Into::into)
    }

    fn resolve_any(&self, id: &crate::id::AnyTaskRef) -> Result<TaskId, TaskdeferError> {
        match id {
            crate::id::AnyTaskRef::Real(id) => Ok(id.clone()),
            crate::id::AnyTaskRef::Lazy(lazy_id) => {
                self.expand_lazy(lazy_id).map_err(TaskdeferError::from)
            }
        }
    }

    /// `all`/`allSettled` (spec §4.6): classify, expand/spawn, then poll.
    pub async fn join_all<K>(
        &self,
        entries: Vec<(K, crate::join::JoinInput)>,
        max_concurrency: Option<usize>,
        timeout_secs: f64,
    ) -> Result<std::collections::HashMap<K, serde_json::Value>, TaskdeferError>
    where
        K: Eq + std::hash::Hash + Clone + std::fmt::Display + std::fmt::Debug,
    {
        let task_ids = crate::join::joiner::resolve_to_task_ids(
            entries,
            max_concurrency,
            DEFAULT_POLL_INTERVAL,
            self.clock.as_ref(),
            &self.store,
            &self.lazy_table,
            |capture| self.spawn(capture),
        )
        .await?;
        crate::join::joiner::all(task_ids, timeout_secs, DEFAULT_POLL_INTERVAL, &self.store, |_, _| {})
            .await
            .map_err(Into::into)
    }

    pub async fn join_all_settled<K>(
        &self,
        entries: Vec<(K, crate::join::JoinInput)>,
        max_concurrency: Option<usize>,
        timeout_secs: f64,
    ) -> Result<std::collections::HashMap<K, crate::join::Settled>, TaskdeferError>
    where
        K: Eq + std::hash::Hash + Clone + std::fmt::Display + std::fmt::Debug,
    {
        let task_ids = crate::join::joiner::resolve_to_task_ids(
            entries,
            max_concurrency,
            DEFAULT_POLL_INTERVAL,
            self.clock.as_ref(),
            &self.store,
            &self.lazy_table,
            |capture| self.spawn(capture),
        )
        .await?;
        Ok(
            crate::join::joiner::all_settled(task_ids, timeout_secs, DEFAULT_POLL_INTERVAL, &self.store, |_, _| {})
                .await,
        )
    }

    fn log_event(&self, level: Level, scope: &str, message: &str) {
        if let Some(log) = &self.log {
            log.append(self.clock.now_utc(), level, scope, message);
        }
    }
}

fn worker_binary_path() -> PathBuf {
    let name = if cfg!(windows) {
        "taskdefer-worker.exe"
    } else {
        "taskdefer-worker"
    };
    match std::env::current_exe() {
        Ok(exe) => exe.with_file_name(name),
        Err(_) => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{callable, Context};

    fn noop(_ctx: &Context) -> Result<serde_json::Value, String> {
        Ok(serde_json::json!("ok"))
    }

    fn test_runtime(dir: &std::path::Path) -> Runtime {
        let mut config = Config::default();
        config.temp_directory = dir.to_path_buf();
        config.logging.enabled = false;
        Runtime {
            store: FsStatusStore::new(&config.temp_directory).unwrap(),
            registry: TaskRegistry::new(),
            lazy_table: LazyTaskTable::new(),
            spawner: Arc::new(crate::spawn::RecordingSpawner::default()),
            clock: Arc::new(SystemClock),
            worker_bin: PathBuf::from("taskdefer-worker"),
            config,
            log: None,
        }
    }

    #[test]
    fn spawn_writes_pending_status_and_registers_metadata() {
        callable::register_named("taskdefer_test::facade_noop", noop);
        let dir = tempfile::tempdir().unwrap();
        let runtime = test_runtime(dir.path());

        let capture = Capture::named("taskdefer_test::facade_noop", Context::new()).unwrap();
        let task_id = runtime.spawn(capture).unwrap();

        assert_eq!(runtime.status(&task_id).status, crate::status::TaskState::Pending);
        assert!(runtime.registry().get(&task_id).is_some());
    }

    #[test]
    fn expand_lazy_spawns_exactly_once() {
        callable::register_named("taskdefer_test::facade_lazy_noop", noop);
        let dir = tempfile::tempdir().unwrap();
        let runtime = test_runtime(dir.path());

        let capture = Capture::named("taskdefer_test::facade_lazy_noop", Context::new()).unwrap();
        let lazy_id = runtime.register_lazy(capture);

        let first = runtime.expand_lazy(&lazy_id).unwrap();
        let second = runtime.expand_lazy(&lazy_id).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn await_any_resolves_lazy_handle_then_polls() {
        callable::register_named("taskdefer_test::facade_await_noop", noop);
        let dir = tempfile::tempdir().unwrap();
        let runtime = test_runtime(dir.path());

        let capture = Capture::named("taskdefer_test::facade_await_noop", Context::new()).unwrap();
        let lazy_id = runtime.register_lazy(capture);
        let real_id = runtime.expand_lazy(&lazy_id).unwrap();

        // The recording spawner never actually runs a worker, so drive the
        // status to COMPLETED ourselves before polling it.
        let mut status = runtime.status(&real_id);
        status.status = crate::status::TaskState::Completed;
        status.result = Some(serde_json::json!("ok"));
        runtime
            .status_store()
            .update(runtime.clock.as_ref(), &real_id, status)
            .unwrap();

        let result = runtime
            .await_any(&crate::id::AnyTaskRef::Lazy(lazy_id), 5.0)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("ok"));
    }
}
