//! Post-response defer scope (spec §4.4): runs once, in registration
//! (FIFO) order, after the host signals the response has been flushed.
//! Bounded deque, max size 50, same oldest-first eviction policy as the
//! global scope. Each callback carries an `always` flag gating it on the
//! host's response code, and may instead request `force_background` to
//! escape into the background-task subsystem entirely.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::SpawnError;
use crate::hooks::{HttpStatusGetter, PostResponseHook};
use crate::id::TaskId;

pub const MAX_SIZE: usize = 50;

/// A user function plus the two flags relevant only to this scope (spec
/// §3 DeferCallback).
pub struct DeferCallback {
    callback: Box<dyn FnOnce() + Send>,
    always: bool,
}

impl std::fmt::Debug for DeferCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferCallback").field("always", &self.always).finish()
    }
}

/// What happened as a result of [`PostResponseScope::register`]: a plain
/// callback is queued for later; a `force_background` request spawns
/// immediately and returns the new task's id.
#[derive(Debug)]
pub enum RegisterOutcome {
    Queued,
    Spawned(TaskId),
}

pub struct PostResponseScope {
    queue: Arc<Mutex<VecDeque<DeferCallback>>>,
    hook: Arc<dyn PostResponseHook>,
    status: Arc<dyn HttpStatusGetter>,
    hook_registered: AtomicBool,
}

impl std::fmt::Debug for PostResponseScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.queue.lock().map(|q| q.len()).unwrap_or(0);
        f.debug_struct("PostResponseScope")
            .field("pending", &len)
            .field("hook_registered", &self.hook_registered.load(Ordering::SeqCst))
            .finish()
    }
}

impl PostResponseScope {
    pub fn new(hook: Arc<dyn PostResponseHook>, status: Arc<dyn HttpStatusGetter>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            hook,
            status,
            hook_registered: AtomicBool::new(false),
        }
    }

    /// Register a plain post-response callback. On overflow past
    /// [`MAX_SIZE`] the oldest queued callback is dropped (spec §4.4).
    /// The scope registers itself with the host's post-response hook the
    /// first time any callback is added, never more than once.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static, always: bool) -> RegisterOutcome {
        {
            let mut queue = self.queue.lock().expect("post-response scope poisoned");
            if queue.len() >= MAX_SIZE {
                queue.pop_front();
            }
            queue.push_back(DeferCallback {
                callback: Box::new(callback),
                always,
            });
        }
        self.ensure_hook_registered();
        RegisterOutcome::Queued
    }

    /// Register with `force_background=true`: escape the post-response
    /// path entirely and hand the work to the background subsystem via
    /// `spawn`, returning its `TaskId` immediately (spec §4.4).
    pub fn register_background(
        &self,
        spawn: impl FnOnce() -> Result<TaskId, SpawnError>,
    ) -> Result<RegisterOutcome, SpawnError> {
        spawn().map(RegisterOutcome::Spawned)
    }

    fn ensure_hook_registered(&self) {
        if self
            .hook_registered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let queue = self.queue.clone();
            let status = self.status.clone();
            self.hook
                .register(Box::new(move || run_queue(&queue, status.as_ref())));
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("post-response scope poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain the queue in FIFO order. On a non-success response code
/// (>=400), only `always=true` callbacks run; on success codes all run.
/// A callback that panics is logged and does not stop the remaining
/// callbacks (spec §4.4, §7 DeferCallbackError: "logged; loop continues").
fn run_queue(queue: &Mutex<VecDeque<DeferCallback>>, status: &dyn HttpStatusGetter) {
    let callbacks: Vec<_> = {
        let mut guard = queue.lock().expect("post-response scope poisoned");
        std::mem::take(&mut *guard).into_iter().collect()
    };
    let code = status.status();
    for entry in callbacks {
        if code >= 400 && !entry.always {
            continue;
        }
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (entry.callback)())) {
            tracing::error!(?e, "post-response defer callback panicked");
        }
    }
}
