//! Shows the delayed path: a task scheduled a few seconds out stays in the
//! delay set until the sweep moves it onto its priority band.
//!
//! cargo run --example delayed_tasks

use chrono::{Duration, Utc};
use mosaiq::{Store, TaskOptions, TaskQueue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let queue = TaskQueue::new(Store::connect(&redis_url).await?, "demo_delayed");

    let id = queue
        .enqueue(
            "image:optimize",
            serde_json::json!({"image_id": "img-2001"}),
            TaskOptions::new()
                .with_priority(1)
                .with_schedule_at(Utc::now() + Duration::seconds(5)),
        )
        .await?;
    println!("enqueued {id}, due in 5s");

    let stats = queue.stats().await?;
    println!("delayed={} pending={}", stats.delayed_tasks, stats.pending_tasks);

    tokio::time::sleep(std::time::Duration::from_secs(6)).await;
    let moved = queue.process_delayed().await?;
    println!("sweep moved {moved} task(s)");

    let task = queue
        .dequeue(std::time::Duration::from_secs(1))
        .await?
        .expect("task became ready");
    println!("dequeued {} ({})", task.id, task.task_type);

    Ok(())
}
