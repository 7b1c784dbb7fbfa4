//! In-process `TaskRegistry` (spec §3 Task attributes, system overview
//! 5% share). Tracks metadata the parent process knows about a task
//! independent of the filesystem status channel — creation time, the
//! capture kind, and context size — so callers can inspect tasks they
//! themselves spawned without a disk round-trip.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::id::TaskId;

#[derive(Debug, Clone)]
pub struct TaskMetadata {
    pub created_at: DateTime<Utc>,
    pub callable_kind: &'static str,
    pub context_size: usize,
    /// Set once the worker's first `RUNNING` update has been observed by
    /// this process (spec invariant 4: "pid is set no later than the
    /// first RUNNING update").
    pub pid: Option<u32>,
}

/// Process-scoped map of task id to metadata. Cheap to clone (backed by
/// `Arc`-sharing `DashMap`'s internal shards are not `Clone`, so this
/// wraps `Arc<DashMap<..>>` instead — see [`TaskRegistry::new`]).
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    inner: std::sync::Arc<DashMap<TaskId, TaskMetadata>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(DashMap::new()),
        }
    }

    pub fn insert(
        &self,
        task_id: TaskId,
        created_at: DateTime<Utc>,
        callable_kind: &'static str,
        context_size: usize,
    ) {
        self.inner.insert(
            task_id,
            TaskMetadata {
                created_at,
                callable_kind,
                context_size,
                pid: None,
            },
        );
    }

    pub fn record_pid(&self, task_id: &TaskId, pid: u32) {
        if let Some(mut entry) = self.inner.get_mut(task_id) {
            entry.pid.get_or_insert(pid);
        }
    }

    pub fn get(&self, task_id: &TaskId) -> Option<TaskMetadata> {
        self.inner.get(task_id).map(|e| e.clone())
    }

    pub fn remove(&self, task_id: &TaskId) {
        self.inner.remove(task_id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn insert_then_get_round_trips() {
        let registry = TaskRegistry::new();
        let id = TaskId::generate(&SystemClock);
        registry.insert(id.clone(), Utc::now(), "named", 3);
        let meta = registry.get(&id).unwrap();
        assert_eq!(meta.callable_kind, "named");
        assert_eq!(meta.context_size, 3);
        assert!(meta.pid.is_none());
    }

    #[test]
    fn pid_is_recorded_once_and_not_overwritten() {
        let registry = TaskRegistry::new();
        let id = TaskId::generate(&SystemClock);
        registry.insert(id.clone(), Utc::now(), "named", 0);
        registry.record_pid(&id, 111);
        registry.record_pid(&id, 222);
        assert_eq!(registry.get(&id).unwrap().pid, Some(111));
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = TaskRegistry::new();
        let id = TaskId::generate(&SystemClock);
        registry.insert(id.clone(), Utc::now(), "named", 0);
        registry.remove(&id);
        assert!(registry.get(&id).is_none());
    }
}
