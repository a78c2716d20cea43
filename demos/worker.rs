//! Runs the full worker side: both built-in queues with the standard handler
//! table, fake adapters standing in for the image/email backends.
//!
//! cargo run --example worker

use mosaiq::jobs::{
    register_default_handlers, AiProcessPayload, ImageProcessPayload, SchemaPayload,
};
use mosaiq::{async_trait, EmailAdapter, HandlerRegistry, ImageAdapter, QueueManager, Store};
use std::sync::Arc;

struct FakeImageBackend;

#[async_trait]
impl ImageAdapter for FakeImageBackend {
    async fn process_image_with_style(&self, params: &ImageProcessPayload) -> anyhow::Result<()> {
        println!("[images] styled {} as '{}'", params.image_id, params.style);
        Ok(())
    }

    async fn process_image_with_ai(&self, params: &AiProcessPayload) -> anyhow::Result<()> {
        println!("[ai] stylized {} as '{}'", params.image_id, params.style);
        Ok(())
    }

    async fn generate_schema(&self, params: &SchemaPayload) -> anyhow::Result<()> {
        println!(
            "[schema] {}x{} {} for {}",
            params.width, params.height, params.palette, params.image_id
        );
        Ok(())
    }

    async fn optimize_image(&self, image_id: &str) -> anyhow::Result<()> {
        println!("[optimize] {image_id}");
        Ok(())
    }

    async fn generate_thumbnails(&self, image_id: &str, sizes: &[u32]) -> anyhow::Result<()> {
        println!("[thumbnails] {image_id} sizes {sizes:?}");
        Ok(())
    }
}

struct FakeMailer;

#[async_trait]
impl EmailAdapter for FakeMailer {
    async fn send_schema(&self, address: &str, url: &str, code: &str) -> anyhow::Result<()> {
        println!("[email] schema {url} (coupon {code}) -> {address}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let store = Store::connect(&redis_url).await?;
    let manager = QueueManager::new(store);

    let mut registry = HandlerRegistry::new();
    register_default_handlers(&mut registry, Arc::new(FakeImageBackend), Arc::new(FakeMailer));
    manager.start_all(Arc::new(registry));
    println!("workers running on {:?}; Ctrl+C to stop", manager.queue_names());

    tokio::signal::ctrl_c().await?;
    manager.stop_all();

    for stats in manager.stats_all().await? {
        println!(
            "{}: pending={} delayed={} completed={} failed={}",
            stats.name,
            stats.pending_tasks,
            stats.delayed_tasks,
            stats.completed_tasks,
            stats.failed_tasks
        );
    }

    Ok(())
}
