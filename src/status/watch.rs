//! `StatusStore::watch` (spec §4.2), with two interchangeable
//! implementations selected at startup — event-driven (via `notify`) and
//! polling — per the design note that correctness must not depend on
//! which is active.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{Event, RecursiveMode, Watcher as NotifyWatcherTrait};

use crate::error::StatusError;
use crate::id::TaskId;

/// Debounce window for rapid successive modify events (spec §4.2: "~100ms").
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Opaque handle returned by [`StatusWatcher::watch`]; dropping it or
/// passing it to [`StatusWatcher::unwatch`] releases the subscription.
#[derive(Debug)]
pub struct WatchHandle {
    id: u64,
}

/// A subscription source for status-file changes. Implementations may be
/// event-driven (inotify/FSEvents/ReadDirectoryChangesW via `notify`) or
/// polling; callers must not depend on which.
pub trait StatusWatcher: Send + Sync + std::fmt::Debug {
    /// Register `on_change` to be invoked (debounced) whenever the status
    /// file for `task_id` is created or modified.
    fn watch(
        &self,
        task_id: &TaskId,
        on_change: Box<dyn Fn() + Send + Sync>,
    ) -> Result<WatchHandle, StatusError>;

    fn unwatch(&self, handle: WatchHandle);
}

/// Event-driven watcher backed by the `notify` crate. Falls back to
/// [`PollingWatcher`] semantics internally if the platform backend fails
/// to initialize (see [`best_available`]).
#[derive(Debug)]
pub struct NotifyStatusWatcher {
    directory: PathBuf,
    inner: std::sync::Arc<std::sync::Mutex<NotifyInner>>,
}

struct NotifyInner {
    // Held only to keep the OS watch alive for the lifetime of `self`;
    // never read again after construction.
    _watcher: notify::RecommendedWatcher,
    next_id: u64,
    subscriptions: Vec<(u64, PathBuf, Box<dyn Fn() + Send + Sync>)>,
}

impl std::fmt::Debug for NotifyInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyInner")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl NotifyStatusWatcher {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, StatusError> {
        let directory = directory.into();
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        let inner = std::sync::Arc::new(std::sync::Mutex::new(NotifyInner {
            _watcher: watcher,
            next_id: 1,
            subscriptions: Vec::new(),
        }));

        // Dispatcher thread: debounce and fan out to subscribers whose
        // path matches the event.
        let dispatch_inner = inner.clone();
        std::thread::spawn(move || {
            let mut last_fired: std::collections::HashMap<PathBuf, std::time::Instant> =
                std::collections::HashMap::new();
            for res in rx {
                let Ok(event) = res else { continue };
                for path in event.paths {
                    let now = std::time::Instant::now();
                    if let Some(prev) = last_fired.get(&path) {
                        if now.duration_since(*prev) < DEBOUNCE {
                            continue;
                        }
                    }
                    last_fired.insert(path.clone(), now);
                    let guard = dispatch_inner.lock().expect("notify watcher poisoned");
                    for (_, sub_path, cb) in &guard.subscriptions {
                        if *sub_path == path {
                            cb();
                        }
                    }
                }
            }
        });

        Ok(Self { directory, inner })
    }
}

impl StatusWatcher for NotifyStatusWatcher {
    fn watch(
        &self,
        task_id: &TaskId,
        on_change: Box<dyn Fn() + Send + Sync>,
    ) -> Result<WatchHandle, StatusError> {
        let path = self.directory.join(format!("{task_id}.status"));
        let mut guard = self.inner.lock().expect("notify watcher poisoned");
        let id = guard.next_id;
        guard.next_id += 1;
        guard.subscriptions.push((id, path, on_change));
        Ok(WatchHandle { id })
    }

    fn unwatch(&self, handle: WatchHandle) {
        let mut guard = self.inner.lock().expect("notify watcher poisoned");
        guard.subscriptions.retain(|(id, _, _)| *id != handle.id);
    }
}

/// Polling fallback: a background thread wakes every [`POLL_INTERVAL`]
/// and re-stats subscribed paths, firing callbacks on mtime change.
/// Chosen automatically by [`best_available`] when the native backend is
/// unavailable (e.g. some container/CI filesystems), and usable directly
/// in tests for determinism.
#[derive(Debug)]
pub struct PollingWatcher {
    directory: PathBuf,
    state: std::sync::Arc<std::sync::Mutex<PollingState>>,
}

#[derive(Debug, Default)]
struct PollingState {
    next_id: u64,
    subscriptions: Vec<PollSubscription>,
}

struct PollSubscription {
    id: u64,
    path: PathBuf,
    last_mtime: Option<std::time::SystemTime>,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl std::fmt::Debug for PollSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSubscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl PollingWatcher {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let state = std::sync::Arc::new(std::sync::Mutex::new(PollingState::default()));
        let thread_state = state.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(POLL_INTERVAL);
            let mut guard = thread_state.lock().expect("polling watcher poisoned");
            for sub in &mut guard.subscriptions {
                let mtime = std::fs::metadata(&sub.path).ok().and_then(|m| m.modified().ok());
                if mtime != sub.last_mtime {
                    sub.last_mtime = mtime;
                    (sub.callback)();
                }
            }
        });
        Self { directory, state }
    }
}

impl StatusWatcher for PollingWatcher {
    fn watch(
        &self,
        task_id: &TaskId,
        on_change: Box<dyn Fn() + Send + Sync>,
    ) -> Result<WatchHandle, StatusError> {
        let path = self.directory.join(format!("{task_id}.status"));
        let mut guard = self.state.lock().expect("polling watcher poisoned");
        let id = guard.next_id;
        guard.next_id += 1;
        guard.subscriptions.push(PollSubscription {
            id,
            path,
            last_mtime: None,
            callback: on_change,
        });
        Ok(WatchHandle { id })
    }

    fn unwatch(&self, handle: WatchHandle) {
        let mut guard = self.state.lock().expect("polling watcher poisoned");
        guard.subscriptions.retain(|s| s.id != handle.id);
    }
}

/// Select the best watcher for `directory`: event-driven if `notify` can
/// initialize a native backend, polling otherwise. Implements the design
/// note's "selected at startup" rule.
pub fn best_available(directory: &Path) -> Box<dyn StatusWatcher> {
    match NotifyStatusWatcher::new(directory) {
        Ok(w) => Box::new(w),
        Err(e) => {
            tracing::warn!(error = %e, "event-driven status watcher unavailable, falling back to polling");
            Box::new(PollingWatcher::new(directory))
        }
    }
}
