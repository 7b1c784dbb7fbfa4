//! End-to-end scenarios exercising the public API as a host application
//! would: through `FsStatusStore` plus the `join`/`monitor` modules,
//! simulating workers with background tasks that write status updates
//! the same way a real `taskdefer-worker` process would.

use std::collections::HashMap;
use std::time::Duration;

use taskdefer::clock::SystemClock;
use taskdefer::join::joiner::{all, all_settled};
use taskdefer::status::{FsStatusStore, TaskState};
use taskdefer::TaskId;

fn store() -> (FsStatusStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (FsStatusStore::new(dir.path()).unwrap(), dir)
}

/// Spawn a background task that behaves like a worker process running a
/// `sleep(delay); return value` callable: writes RUNNING immediately,
/// then COMPLETED with `value` after `delay`.
fn simulate_worker(
    store: FsStatusStore,
    task_id: TaskId,
    delay: Duration,
    value: serde_json::Value,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let clock = SystemClock;
        let mut running = store.read(&task_id);
        running.status = TaskState::Running;
        store.update(&clock, &task_id, running).unwrap();

        tokio::time::sleep(delay).await;

        let mut done = store.read(&task_id);
        done.status = TaskState::Completed;
        done.result = Some(value);
        store.update(&clock, &task_id, done).unwrap();
    })
}

fn register(store: &FsStatusStore, clock: &SystemClock) -> TaskId {
    let id = TaskId::generate(clock);
    store.create_initial(clock, &id, "named", 0).unwrap();
    id
}

#[tokio::test]
async fn two_parallel_sleeps_complete_concurrently_not_serially() {
    let (store, _dir) = store();
    let clock = SystemClock;

    let a = register(&store, &clock);
    let b = register(&store, &clock);

    let h1 = simulate_worker(store.clone(), a.clone(), Duration::from_millis(60), serde_json::json!("A"));
    let h2 = simulate_worker(store.clone(), b.clone(), Duration::from_millis(90), serde_json::json!("B"));

    let mut ids = HashMap::new();
    ids.insert("a", a);
    ids.insert("b", b);

    let started = std::time::Instant::now();
    let result = all(ids, 5.0, Duration::from_millis(5), &store, |_, _| {})
        .await
        .unwrap();
    let elapsed = started.elapsed();

    h1.await.unwrap();
    h2.await.unwrap();

    assert_eq!(result["a"], serde_json::json!("A"));
    assert_eq!(result["b"], serde_json::json!("B"));
    // Serial execution would take >= 150ms; concurrent execution should
    // finish close to the slower task's 90ms, not the sum.
    assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}, looks serial");
}

#[tokio::test]
async fn fail_fast_join_names_the_failing_key_and_reason() {
    let (store, _dir) = store();
    let clock = SystemClock;

    let ok = register(&store, &clock);
    let bad = register(&store, &clock);

    let h1 = simulate_worker(store.clone(), ok.clone(), Duration::from_millis(200), serde_json::json!("x"));
    let store_for_bad = store.clone();
    let bad_id = bad.clone();
    let h2 = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut status = store_for_bad.read(&bad_id);
        status.status = TaskState::Error;
        status.error_message = Some("boom".to_string());
        store_for_bad.update(&SystemClock, &bad_id, status).unwrap();
    });

    let mut ids = HashMap::new();
    ids.insert("ok", ok);
    ids.insert("bad", bad);

    let started = std::time::Instant::now();
    let err = all(ids, 5.0, Duration::from_millis(5), &store, |_, _| {})
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    h2.await.unwrap();
    // Don't wait on h1 — the ok task still has 180ms left to run; fail-fast
    // must not wait for it.
    drop(h1);

    let message = err.to_string();
    assert!(message.contains("bad"));
    assert!(message.contains("boom"));
    assert!(elapsed < Duration::from_millis(150), "fail-fast waited for the slower task");
}

#[tokio::test]
async fn settled_join_reports_every_outcome_and_never_errors() {
    let (store, _dir) = store();
    let clock = SystemClock;

    let ok = register(&store, &clock);
    let bad = register(&store, &clock);
    let h1 = simulate_worker(store.clone(), ok.clone(), Duration::from_millis(10), serde_json::json!("x"));

    let mut status = store.read(&bad);
    status.status = TaskState::Error;
    status.error_message = Some("boom".to_string());
    store.update(&clock, &bad, status).unwrap();

    let mut ids = HashMap::new();
    ids.insert("ok", ok);
    ids.insert("bad", bad);

    let settled = all_settled(ids, 5.0, Duration::from_millis(5), &store, |_, _| {}).await;
    h1.await.unwrap();

    match &settled["ok"] {
        taskdefer::join::Settled::Fulfilled { value } => assert_eq!(*value, serde_json::json!("x")),
        other => panic!("expected fulfilled, got {other:?}"),
    }
    match &settled["bad"] {
        taskdefer::join::Settled::Rejected { reason } => assert!(reason.contains("boom")),
        other => panic!("expected rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn pool_cap_of_two_over_five_tasks_runs_in_roughly_three_batches() {
    let (store, _dir) = store();
    let clock = SystemClock;

    let items: Vec<(String, Duration)> = (0..5)
        .map(|i| (format!("t{i}"), Duration::from_millis(40)))
        .collect();

    let started = std::time::Instant::now();
    let results = taskdefer::join::pool::run(
        2,
        Duration::from_millis(5),
        &clock,
        &store,
        items,
        |delay| {
            let id = TaskId::generate(&SystemClock);
            store.create_initial(&SystemClock, &id, "named", 0).unwrap();
            let store = store.clone();
            let id_for_task = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut status = store.read(&id_for_task);
                status.status = TaskState::Completed;
                status.result = Some(serde_json::Value::Null);
                store.update(&SystemClock, &id_for_task, status).unwrap();
            });
            Ok(id)
        },
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 5);
    // Ceil(5/2) = 3 batches of ~40ms each; well below 5 serial batches
    // (200ms) and above a single unbounded batch (40ms).
    assert!(elapsed >= Duration::from_millis(100), "pool did not respect the cap: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "pool ran far slower than expected: {elapsed:?}");
}

#[tokio::test]
async fn lazy_task_expanded_twice_spawns_its_callback_exactly_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use taskdefer::lazy::LazyTaskTable;
    use taskdefer::{Capture, Context};

    taskdefer::capture::register_named("scenarios::side_effect_once", |_ctx: &Context| {
        Ok(serde_json::json!("ran"))
    });

    let (store, _dir) = store();
    let table = LazyTaskTable::new();
    let capture = Capture::named("scenarios::side_effect_once", Context::new()).unwrap();
    let lazy_id = table.register(capture);

    let spawn_count = Arc::new(AtomicUsize::new(0));
    let store_clone = store.clone();
    let count_for_spawn = spawn_count.clone();
    let spawn = move |_capture: Capture| -> Result<TaskId, taskdefer::error::SpawnError> {
        count_for_spawn.fetch_add(1, Ordering::SeqCst);
        let id = TaskId::generate(&SystemClock);
        store_clone.create_initial(&SystemClock, &id, "named", 0).unwrap();
        let mut status = store_clone.read(&id);
        status.status = TaskState::Completed;
        status.result = Some(serde_json::json!("ran"));
        store_clone.update(&SystemClock, &id, status).unwrap();
        Ok(id)
    };

    let first = table.expand(&lazy_id, spawn.clone()).unwrap();
    let second = table.expand(&lazy_id, spawn).unwrap();

    assert_eq!(first, second);
    assert_eq!(spawn_count.load(Ordering::SeqCst), 1);
    assert_eq!(store.read(&first).result, Some(serde_json::json!("ran")));
}
