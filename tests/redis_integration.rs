//! Redis integration tests for the task queue engine.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` to point at your instance; default `redis://localhost:6379`.
//! Each test uses a uniquely named queue so runs never interfere.

use chrono::{Duration as ChronoDuration, Utc};
use mosaiq::{
    HandlerRegistry, JobContext, QueueManager, Store, Task, TaskHandler, TaskOptions, TaskQueue,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn store() -> Store {
    Store::connect(&redis_url())
        .await
        .expect("failed to connect to Redis")
}

fn unique(name: &str) -> String {
    format!("{}-{}", name, uuid::Uuid::new_v4())
}

fn delayed_key(queue_name: &str) -> String {
    format!("mosaiq:queue:{queue_name}:delayed")
}

fn completed_key(queue_name: &str) -> String {
    format!("mosaiq:queue:{queue_name}:completed")
}

fn failed_key(queue_name: &str) -> String {
    format!("mosaiq:queue:{queue_name}:failed")
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn priority_ordering_across_bands() {
    let queue = TaskQueue::new(store().await, unique("prio"));

    for priority in [2u8, 9, 5] {
        queue
            .enqueue(
                "schema:generate",
                serde_json::json!({"p": priority}),
                TaskOptions::new().with_priority(priority),
            )
            .await
            .expect("enqueue");
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let task = queue
            .dequeue(Duration::from_secs(1))
            .await
            .expect("dequeue")
            .expect("task ready");
        seen.push(task.priority);
    }

    assert_eq!(seen, vec![9, 5, 2]);
    assert!(queue.dequeue(Duration::from_millis(200)).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn fifo_within_a_band() {
    let queue = TaskQueue::new(store().await, unique("fifo"));

    let first = queue
        .enqueue("email:send_schema", serde_json::json!({"n": 1}), TaskOptions::new().with_priority(3))
        .await
        .unwrap();
    let second = queue
        .enqueue("email:send_schema", serde_json::json!({"n": 2}), TaskOptions::new().with_priority(3))
        .await
        .unwrap();

    let a = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
    let b = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
    assert_eq!(a.id, first);
    assert_eq!(b.id, second);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn delayed_task_invisible_until_swept() {
    let queue = TaskQueue::new(store().await, unique("delay"));

    queue
        .enqueue(
            "image:optimize",
            serde_json::json!({"image_id": "img-1"}),
            TaskOptions::new()
                .with_priority(1)
                .with_schedule_at(Utc::now() + ChronoDuration::seconds(2)),
        )
        .await
        .unwrap();

    // Not ready yet, and the sweep must not surface it early.
    assert!(queue.dequeue(Duration::from_millis(200)).await.unwrap().is_none());
    assert_eq!(queue.process_delayed().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(queue.process_delayed().await.unwrap(), 1);
    let task = queue
        .dequeue(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("swept task is ready");
    assert_eq!(task.task_type, "image:optimize");
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn sweep_moves_each_task_exactly_once() {
    let queue = TaskQueue::new(store().await, unique("sweep"));

    queue
        .enqueue(
            "image:thumbnails",
            serde_json::json!({"image_id": "img-2", "sizes": [64]}),
            TaskOptions::new().with_schedule_at(Utc::now() + ChronoDuration::seconds(1)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(queue.process_delayed().await.unwrap(), 1);
    assert_eq!(queue.process_delayed().await.unwrap(), 0);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending_tasks, 1);
    assert_eq!(stats.delayed_tasks, 0);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn retry_exhaustion_lands_in_failed_archive() {
    let store = store().await;
    let name = unique("retry");
    let queue = TaskQueue::new(store.clone(), &name);

    queue
        .enqueue(
            "image:process",
            serde_json::json!({"image_id": "img-3", "style": "classic"}),
            TaskOptions::new().with_priority(4).with_max_retries(2),
        )
        .await
        .unwrap();

    // First failure: 1-minute backoff.
    let mut task = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
    queue.mark_failed(&mut task, "render crashed").await.unwrap();
    assert_eq!(task.retries, 1);
    assert_eq!(task.error.as_deref(), Some("render crashed"));
    let due = task.scheduled_at.expect("retry is scheduled");
    let lag = (due - Utc::now()).num_seconds();
    assert!((55..=65).contains(&lag), "first backoff ~60s, got {lag}");
    assert_eq!(queue.stats().await.unwrap().delayed_tasks, 1);

    // Rewind the schedule so the sweep picks it up now.
    let raw = serde_json::to_string(&task).unwrap();
    store
        .zset_add(&delayed_key(&name), &raw, Utc::now().timestamp() - 1)
        .await
        .unwrap();
    assert_eq!(queue.process_delayed().await.unwrap(), 1);

    // Second failure: 4-minute backoff.
    let mut task = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
    queue.mark_failed(&mut task, "render crashed").await.unwrap();
    assert_eq!(task.retries, 2);
    let due = task.scheduled_at.expect("retry is scheduled");
    let lag = (due - Utc::now()).num_seconds();
    assert!((235..=245).contains(&lag), "second backoff ~240s, got {lag}");

    let raw = serde_json::to_string(&task).unwrap();
    store
        .zset_add(&delayed_key(&name), &raw, Utc::now().timestamp() - 1)
        .await
        .unwrap();
    assert_eq!(queue.process_delayed().await.unwrap(), 1);

    // Third failure: retries exhausted, permanent.
    let mut task = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
    queue.mark_failed(&mut task, "render crashed").await.unwrap();
    assert!(task.processed_at.is_some());

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending_tasks, 0);
    assert_eq!(stats.delayed_tasks, 0);
    assert_eq!(stats.completed_tasks, 0);
    assert_eq!(stats.failed_tasks, 1);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn completed_and_failed_archives_are_exclusive() {
    let queue = TaskQueue::new(store().await, unique("archive"));

    queue
        .enqueue("schema:generate", serde_json::json!({"ok": true}), TaskOptions::new())
        .await
        .unwrap();
    queue
        .enqueue(
            "schema:generate",
            serde_json::json!({"ok": false}),
            TaskOptions::new().with_max_retries(0),
        )
        .await
        .unwrap();

    let mut good = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
    let mut bad = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();

    queue.mark_completed(&mut good).await.unwrap();
    queue.mark_failed(&mut bad, "palette mismatch").await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending_tasks, 0);
    assert_eq!(stats.delayed_tasks, 0);
    assert_eq!(stats.completed_tasks, 1);
    assert_eq!(stats.failed_tasks, 1);
    assert!(good.processed_at.is_some());
    assert_ne!(good.id, bad.id);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn purge_drops_only_stale_archive_entries() {
    let store = store().await;
    let name = unique("purge");
    let queue = TaskQueue::new(store.clone(), &name);

    let now = Utc::now().timestamp();
    let completed = completed_key(&name);
    let failed = failed_key(&name);

    // Two completed entries past the 24h cutoff, one within it.
    store.zset_add(&completed, "stale-a", now - 25 * 3600).await.unwrap();
    store.zset_add(&completed, "stale-b", now - 48 * 3600).await.unwrap();
    store.zset_add(&completed, "recent-c", now - 3600).await.unwrap();
    // One failed entry past the 7d cutoff, one within it.
    store.zset_add(&failed, "stale-f", now - 8 * 24 * 3600).await.unwrap();
    store.zset_add(&failed, "recent-f", now - 24 * 3600).await.unwrap();

    let (completed_removed, failed_removed) = queue.purge_archives().await.unwrap();
    assert_eq!(completed_removed, 2);
    assert_eq!(failed_removed, 1);

    let left = store
        .zset_range_by_score(&completed, i64::MIN, i64::MAX)
        .await
        .unwrap();
    assert_eq!(left, vec!["recent-c".to_string()]);
    let left = store
        .zset_range_by_score(&failed, i64::MIN, i64::MAX)
        .await
        .unwrap();
    assert_eq!(left, vec!["recent-f".to_string()]);

    // A second purge is a no-op.
    assert_eq!(queue.purge_archives().await.unwrap(), (0, 0));
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn dequeue_survives_repeated_polls() {
    // Polls reuse the queue's blocking connection: an empty timeout, a hit
    // and another empty timeout must all behave on the same instance.
    let queue = TaskQueue::new(store().await, unique("poll"));

    assert!(queue.dequeue(Duration::from_millis(200)).await.unwrap().is_none());

    let id = queue
        .enqueue("image:optimize", serde_json::json!({"image_id": "img-7"}), TaskOptions::new())
        .await
        .unwrap();
    let task = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
    assert_eq!(task.id, id);

    assert!(queue.dequeue(Duration::from_millis(200)).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn unknown_task_type_fails_on_first_attempt() {
    let store = store().await;
    let name = unique("unknown");
    let queue = Arc::new(TaskQueue::new(store.clone(), &name));

    queue
        .enqueue(
            "video:transcode",
            serde_json::json!({}),
            TaskOptions::new().with_max_retries(0),
        )
        .await
        .unwrap();

    // Empty handler table: dispatch must fail the task immediately.
    Arc::clone(&queue).start_worker(Arc::new(HandlerRegistry::new()));

    let mut failed = 0;
    for _ in 0..40 {
        failed = queue.stats().await.unwrap().failed_tasks;
        if failed > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    queue.close();

    assert_eq!(failed, 1);
    let entries = store
        .zset_range_by_score(&failed_key(&name), i64::MIN, i64::MAX)
        .await
        .unwrap();
    let task: Task = serde_json::from_str(&entries[0]).unwrap();
    assert_eq!(task.error.as_deref(), Some("unknown task type: video:transcode"));
}

struct CountingHandler {
    calls: Arc<AtomicUsize>,
}

#[mosaiq::async_trait]
impl TaskHandler for CountingHandler {
    async fn handle(&self, _ctx: &JobContext, _task: &Task) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn worker_completes_tasks_end_to_end() {
    let queue = Arc::new(TaskQueue::new(store().await, unique("worker")));

    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(
        "email:send_schema",
        Arc::new(CountingHandler {
            calls: Arc::clone(&calls),
        }),
    );

    Arc::clone(&queue).start_worker(Arc::new(registry));

    queue
        .enqueue(
            "email:send_schema",
            serde_json::json!({"address": "a@b.c"}),
            TaskOptions::new().with_priority(3),
        )
        .await
        .unwrap();

    let mut completed = 0;
    for _ in 0..40 {
        completed = queue.stats().await.unwrap().completed_tasks;
        if completed > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    queue.close();

    assert_eq!(completed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn manager_aggregates_stats_across_queues() {
    let manager = QueueManager::new(store().await);
    let ad_hoc = unique("exports");
    let queue = manager.queue(&ad_hoc);

    queue
        .enqueue("export:csv", serde_json::json!({}), TaskOptions::new().with_priority(2))
        .await
        .unwrap();

    let stats = manager.stats_all().await.unwrap();
    assert_eq!(stats.len(), 3);

    let entry = stats.iter().find(|s| s.name == ad_hoc).expect("ad hoc queue listed");
    assert_eq!(entry.pending_tasks, 1);
    assert_eq!(entry.failed_tasks, 0);

    manager.stop_all();
}
