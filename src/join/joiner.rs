//! `all`/`allSettled` (spec §4.6): run N tasks with optional concurrency
//! cap, preserving input keys, expanding lazy handles and raw callables.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::capture::Capture;
use crate::clock::Clock;
use crate::error::{JoinError, SpawnError};
use crate::id::{LazyTaskId, TaskId};
use crate::lazy::LazyTaskTable;
use crate::status::{FsStatusStore, TaskStatus};

use super::pool;

/// One joiner input entry: already-spawned, not-yet-spawned, or raw
/// (spec §4.6: "a TaskId, a LazyTask id, a raw callable").
#[derive(Debug)]
pub enum JoinInput {
    Real(TaskId),
    Lazy(LazyTaskId),
    Raw(Capture),
}

/// Per-key outcome of `allSettled` (spec §4.6 step 4).
#[derive(Debug, Clone)]
pub enum Settled {
    Fulfilled { value: serde_json::Value },
    Rejected { reason: String },
}

/// Classify and spawn/expand every entry into a concrete `TaskId`,
/// routing through the bounded pool when `max_concurrency` is set and
/// any entry is lazy/raw. Per the §9 open question resolution, mixing an
/// already-spawned `TaskId` into a pool-routed call is a hard error.
pub async fn resolve_to_task_ids<K>(
    entries: Vec<(K, JoinInput)>,
    max_concurrency: Option<usize>,
    poll_interval: Duration,
    clock: &dyn Clock,
    store: &FsStatusStore,
    lazy_table: &LazyTaskTable,
    spawn: impl Fn(Capture) -> Result<TaskId, SpawnError> + Clone,
) -> Result<HashMap<K, TaskId>, JoinError>
where
    K: Eq + std::hash::Hash + Clone + std::fmt::Display,
{
    let needs_pool_routing = max_concurrency.is_some()
        && entries
            .iter()
            .any(|(_, e)| matches!(e, JoinInput::Lazy(_) | JoinInput::Raw(_)));

    if needs_pool_routing {
        if let Some((key, _)) = entries.iter().find(|(_, e)| matches!(e, JoinInput::Real(_))) {
            return Err(JoinError::MixedPoolInput(key.to_string()));
        }
        let lazy_table = lazy_table.clone();
        let spawn = spawn.clone();
        let result = pool::run(
            max_concurrency.unwrap(),
            poll_interval,
            clock,
            store,
            entries,
            move |item| match item {
                JoinInput::Raw(capture) => spawn(capture),
                JoinInput::Lazy(lazy_id) => lazy_table.expand(&lazy_id, &spawn),
                JoinInput::Real(_) => unreachable!("Real entries are rejected above"),
            },
        )
        .await;
        return Ok(result);
    }

    let mut map = HashMap::new();
    for (key, entry) in entries {
        let task_id = match entry {
            JoinInput::Real(id) => id,
            JoinInput::Raw(capture) => spawn(capture).map_err(|source| JoinError::SpawnFailed {
                key: key.to_string(),
                source,
            })?,
            JoinInput::Lazy(lazy_id) => {
                lazy_table
                    .expand(&lazy_id, &spawn)
                    .map_err(|source| JoinError::SpawnFailed {
                        key: key.to_string(),
                        source,
                    })?
            }
        };
        map.insert(key, task_id);
    }
    Ok(map)
}

/// Fail-fast join (spec §4.6 step 3): returns as soon as every task is
/// terminal, or errors on the first `ERROR`/`NOT_FOUND`, or on timeout.
pub async fn all<K>(
    task_ids: HashMap<K, TaskId>,
    timeout_secs: f64,
    poll_interval: Duration,
    store: &FsStatusStore,
    mut on_output: impl FnMut(&K, &str),
) -> Result<HashMap<K, serde_json::Value>, JoinError>
where
    K: Eq + std::hash::Hash + Clone + std::fmt::Debug,
{
    let deadline = Instant::now() + Duration::from_secs_f64(timeout_secs);
    let mut pending: HashMap<K, TaskId> = task_ids;
    let mut done: HashMap<K, TaskStatus> = HashMap::new();
    let mut streamed: HashMap<K, String> = HashMap::new();

    loop {
        let mut newly_done = Vec::new();
        for (key, task_id) in pending.iter() {
            let status = store.read(task_id);
            if let Some(output) = &status.output {
                let seen = streamed.entry(key.clone()).or_default();
                if let Some(suffix) = output.strip_prefix(seen.as_str()) {
                    if !suffix.is_empty() {
                        on_output(key, suffix);
                    }
                }
                *seen = output.clone();
            }

            use crate::status::TaskState::*;
            match status.status {
                Completed => newly_done.push((key.clone(), status)),
                Error | NotFound | Corrupted | SpawnError => {
                    return Err(match status.status {
                        NotFound | Corrupted => JoinError::TaskNotFound {
                            key: format!("{key:?}"),
                            task_id: task_id.clone(),
                        },
                        _ => JoinError::TaskFailed {
                            key: format!("{key:?}"),
                            task_id: task_id.clone(),
                            message: status.error_message.unwrap_or(status.message),
                        },
                    });
                }
                _ => {}
            }
        }

        for (key, status) in newly_done {
            pending.remove(&key);
            done.insert(key, status);
        }

        if pending.is_empty() {
            return Ok(done
                .into_iter()
                .map(|(k, s)| (k, s.result.unwrap_or(serde_json::Value::Null)))
                .collect());
        }

        if Instant::now() >= deadline {
            return Err(JoinError::Timeout {
                timeout_secs,
                pending: pending
                    .into_iter()
                    .map(|(k, id)| (format!("{k:?}"), id))
                    .collect(),
            });
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Settled join (spec §4.6 step 4): never fails; every key resolves to
/// `Fulfilled` or `Rejected`, including a timeout reason for whatever is
/// still pending when the budget expires.
pub async fn all_settled<K>(
    task_ids: HashMap<K, TaskId>,
    timeout_secs: f64,
    poll_interval: Duration,
    store: &FsStatusStore,
    mut on_output: impl FnMut(&K, &str),
) -> HashMap<K, Settled>
where
    K: Eq + std::hash::Hash + Clone + std::fmt::Debug,
{
    let deadline = Instant::now() + Duration::from_secs_f64(timeout_secs);
    let mut pending: HashMap<K, TaskId> = task_ids;
    let mut settled: HashMap<K, Settled> = HashMap::new();
    let mut streamed: HashMap<K, String> = HashMap::new();

    loop {
        let mut newly_done = Vec::new();
        for (key, task_id) in pending.iter() {
            let status = store.read(task_id);
            if let Some(output) = &status.output {
                let seen = streamed.entry(key.clone()).or_default();
                if let Some(suffix) = output.strip_prefix(seen.as_str()) {
                    if !suffix.is_empty() {
                        on_output(key, suffix);
                    }
                }
                *seen = output.clone();
            }
            if status.status.is_terminal() || status.status.is_synthetic() {
                newly_done.push((key.clone(), status));
            }
        }

        for (key, status) in newly_done {
            pending.remove(&key);
            let outcome = match status.status {
                crate::status::TaskState::Completed => Settled::Fulfilled {
                    value: status.result.unwrap_or(serde_json::Value::Null),
                },
                _ => Settled::Rejected {
                    reason: status.error_message.unwrap_or(status.message),
                },
            };
            settled.insert(key, outcome);
        }

        if pending.is_empty() {
            return settled;
        }

        if Instant::now() >= deadline {
            for (key, _) in pending {
                settled.insert(
                    key,
                    Settled::Rejected {
                        reason: format!("timed out after {timeout_secs}s"),
                    },
                );
            }
            return settled;
        }

        tokio::time::sleep(poll_interval).await;
    }
}
