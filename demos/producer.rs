//! Enqueues one of each job kind; run `--example worker` alongside to see
//! them drain in priority order.
//!
//! cargo run --example producer

use mosaiq::jobs::{
    enqueue_ai_processing, enqueue_image_processing, enqueue_schema_email,
    enqueue_schema_generation, enqueue_thumbnails, AiProcessPayload, EmailPayload,
    ImageProcessPayload, SchemaPayload, ThumbnailPayload,
};
use mosaiq::{QueueManager, Store, AI_IMAGES_QUEUE, IMAGES_QUEUE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let store = Store::connect(&redis_url).await?;
    let manager = QueueManager::new(store);

    let images = manager.queue(IMAGES_QUEUE);
    let ai_images = manager.queue(AI_IMAGES_QUEUE);

    let id = enqueue_image_processing(
        &images,
        ImageProcessPayload {
            image_id: "img-1001".into(),
            style: "classic".into(),
            lighting: None,
            contrast: None,
            use_ai: false,
            reprocess_count: 0,
        },
    )
    .await?;
    println!("image:process enqueued as {id}");

    let id = enqueue_ai_processing(
        &ai_images,
        AiProcessPayload {
            image_id: "img-1002".into(),
            style: "pop_art".into(),
            lighting: Some(0.4),
            contrast: Some(0.8),
            base_priority: 1,
        },
    )
    .await?;
    println!("image:ai_process enqueued as {id}");

    let id = enqueue_schema_generation(
        &images,
        SchemaPayload {
            image_id: "img-1001".into(),
            width: 120,
            height: 160,
            palette: "dmc-25".into(),
        },
    )
    .await?;
    println!("schema:generate enqueued as {id}");

    let id = enqueue_schema_email(
        &images,
        EmailPayload {
            address: "customer@example.com".into(),
            schema_url: "https://cdn.example.com/schemas/img-1001.pdf".into(),
            coupon_code: "MOSAIC-7F2K".into(),
        },
    )
    .await?;
    println!("email:send_schema enqueued as {id}");

    let id = enqueue_thumbnails(
        &images,
        ThumbnailPayload {
            image_id: "img-1001".into(),
            sizes: vec![64, 256],
        },
    )
    .await?;
    println!("image:thumbnails enqueued as {id}");

    Ok(())
}
