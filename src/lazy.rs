//! `LazyTaskTable` (spec §3 LazyTask, system overview 5% share): a
//! process-scoped table of captured-but-not-yet-spawned task handles.
//!
//! A `LazyTask` is expanded **at most once** (spec invariant 6): the
//! first `expand` call spawns the underlying callable and records the
//! resulting `TaskId`; every later call for the same handle returns that
//! same id without spawning again.

use std::sync::Mutex;

use dashmap::DashMap;

use crate::capture::{Capture, Context};
use crate::error::SpawnError;
use crate::id::{LazyTaskId, TaskId};

struct LazyEntry {
    capture: Mutex<Option<Capture>>,
    real_task_id: Mutex<Option<TaskId>>,
}

/// Process-scoped table of not-yet-spawned task handles (spec §3).
#[derive(Clone)]
pub struct LazyTaskTable {
    inner: std::sync::Arc<DashMap<LazyTaskId, LazyEntry>>,
}

impl std::fmt::Debug for LazyTaskTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyTaskTable")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Default for LazyTaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyTaskTable {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(DashMap::new()),
        }
    }

    /// Register a captured callable, returning the `lazy_<n>` handle
    /// callers use until (and if) it is expanded.
    pub fn register(&self, capture: Capture) -> LazyTaskId {
        let id = LazyTaskId::generate();
        self.inner.insert(
            id.clone(),
            LazyEntry {
                capture: Mutex::new(Some(capture)),
                real_task_id: Mutex::new(None),
            },
        );
        id
    }

    /// Mutate the context of a not-yet-expanded lazy task. Per spec §3,
    /// context may be mutated before expansion but never after; once
    /// expanded this returns `false` and performs no mutation.
    pub fn mutate_context(&self, id: &LazyTaskId, f: impl FnOnce(&mut Context)) -> bool {
        let Some(entry) = self.inner.get(id) else {
            return false;
        };
        let mut guard = entry.capture.lock().expect("lazy table poisoned");
        match guard.as_mut() {
            Some(capture) => {
                f(&mut capture.context);
                true
            }
            None => false,
        }
    }

    pub fn is_executed(&self, id: &LazyTaskId) -> bool {
        self.inner
            .get(id)
            .map(|e| e.real_task_id.lock().expect("lazy table poisoned").is_some())
            .unwrap_or(false)
    }

    /// Expand `id`, spawning the underlying capture via `spawn` exactly
    /// once. `spawn` is only invoked on the first call for a given
    /// handle; every subsequent call returns the cached `real_task_id`
    /// (spec invariant 6).
    pub fn expand(
        &self,
        id: &LazyTaskId,
        spawn: impl FnOnce(Capture) -> Result<TaskId, SpawnError>,
    ) -> Result<TaskId, SpawnError> {
        let entry = self
            .inner
            .get(id)
            .unwrap_or_else(|| panic!("unknown lazy task id {id}"));

        // Fast path: already expanded.
        if let Some(real) = entry.real_task_id.lock().expect("lazy table poisoned").clone() {
            return Ok(real);
        }

        let mut real_guard = entry.real_task_id.lock().expect("lazy table poisoned");
        // Re-check under the lock in case another thread raced us.
        if let Some(real) = real_guard.clone() {
            return Ok(real);
        }
        let capture = entry
            .capture
            .lock()
            .expect("lazy table poisoned")
            .take()
            .expect("capture already taken without real_task_id recorded");
        let real = spawn(capture)?;
        *real_guard = Some(real.clone());
        Ok(real)
    }

    pub fn real_task_id(&self, id: &LazyTaskId) -> Option<TaskId> {
        self.inner
            .get(id)
            .and_then(|e| e.real_task_id.lock().expect("lazy table poisoned").clone())
    }
}
