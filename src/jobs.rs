// src/jobs.rs
//
// Typed constructors and handlers for the mosaic-art job kinds. Each kind has
// a concrete payload struct, an enqueue helper with tuned priority/retry
// defaults, and a handler that deserializes the payload and calls the opaque
// domain adapters.
use crate::{
    HandlerRegistry, JobContext, Result, Task, TaskHandler, TaskId, TaskOptions, TaskQueue,
    MAX_PRIORITY,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const TYPE_IMAGE_PROCESS: &str = "image:process";
pub const TYPE_AI_PROCESS: &str = "image:ai_process";
pub const TYPE_SCHEMA_GENERATE: &str = "schema:generate";
pub const TYPE_EMAIL_SCHEMA: &str = "email:send_schema";
pub const TYPE_IMAGE_OPTIMIZE: &str = "image:optimize";
pub const TYPE_IMAGE_THUMBNAILS: &str = "image:thumbnails";

/// Styles where artifacts are obvious to the customer, worth a priority bump.
const VISUALLY_SENSITIVE_STYLES: &[&str] = &["pop_art", "oil_painting", "watercolor", "stained_glass"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProcessPayload {
    pub image_id: String,
    pub style: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
    #[serde(default)]
    pub use_ai: bool,
    /// Domain-level reprocessing counter, distinct from the queue's retry
    /// counter: this counts deliberate business re-runs, not infra failures.
    #[serde(default)]
    pub reprocess_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiProcessPayload {
    pub image_id: String,
    pub style: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
    #[serde(default)]
    pub base_priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaPayload {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub palette: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    pub address: String,
    pub schema_url: String,
    pub coupon_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizePayload {
    pub image_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailPayload {
    pub image_id: String,
    pub sizes: Vec<u32>,
}

/// Priority for an AI-stylization job.
///
/// Starts from the caller's base, bumps for visually sensitive styles (+1),
/// adds a flat +3 because AI jobs are latency-visible, +1 each when lighting
/// or contrast tuning is requested, clamps to 1..=10, then floors at 6.
pub fn ai_priority(base: u8, style: &str, lighting: Option<f64>, contrast: Option<f64>) -> u8 {
    let mut priority = base as u16;
    if VISUALLY_SENSITIVE_STYLES.contains(&style) {
        priority += 1;
    }
    priority += 3;
    if lighting.is_some() {
        priority += 1;
    }
    if contrast.is_some() {
        priority += 1;
    }
    (priority.clamp(1, MAX_PRIORITY as u16) as u8).max(6)
}

pub async fn enqueue_image_processing(
    queue: &TaskQueue,
    payload: ImageProcessPayload,
) -> Result<TaskId> {
    queue
        .enqueue(
            TYPE_IMAGE_PROCESS,
            serde_json::to_value(&payload)?,
            TaskOptions::new().with_priority(5).with_max_retries(3),
        )
        .await
}

/// Re-run image processing as a business decision (a new pass over the same
/// image), bumping the domain counter. The queue's own retry counter starts
/// fresh: it only covers transient infrastructure failure.
pub async fn enqueue_image_reprocessing(
    queue: &TaskQueue,
    mut payload: ImageProcessPayload,
) -> Result<TaskId> {
    payload.reprocess_count += 1;
    enqueue_image_processing(queue, payload).await
}

pub async fn enqueue_ai_processing(
    queue: &TaskQueue,
    payload: AiProcessPayload,
) -> Result<TaskId> {
    let priority = ai_priority(
        payload.base_priority,
        &payload.style,
        payload.lighting,
        payload.contrast,
    );
    queue
        .enqueue(
            TYPE_AI_PROCESS,
            serde_json::to_value(&payload)?,
            TaskOptions::new().with_priority(priority).with_max_retries(3),
        )
        .await
}

/// Explicitly urgent AI job: priority 10, heuristic bypassed.
pub async fn enqueue_urgent_ai_processing(
    queue: &TaskQueue,
    payload: AiProcessPayload,
) -> Result<TaskId> {
    queue
        .enqueue(
            TYPE_AI_PROCESS,
            serde_json::to_value(&payload)?,
            TaskOptions::new()
                .with_priority(MAX_PRIORITY)
                .with_max_retries(3),
        )
        .await
}

/// Schema generation is user-visible and latency-sensitive: high priority,
/// few retries.
pub async fn enqueue_schema_generation(queue: &TaskQueue, payload: SchemaPayload) -> Result<TaskId> {
    queue
        .enqueue(
            TYPE_SCHEMA_GENERATE,
            serde_json::to_value(&payload)?,
            TaskOptions::new().with_priority(8).with_max_retries(2),
        )
        .await
}

/// Email is cheap to retry.
pub async fn enqueue_schema_email(queue: &TaskQueue, payload: EmailPayload) -> Result<TaskId> {
    queue
        .enqueue(
            TYPE_EMAIL_SCHEMA,
            serde_json::to_value(&payload)?,
            TaskOptions::new().with_priority(3).with_max_retries(5),
        )
        .await
}

pub async fn enqueue_image_optimize(queue: &TaskQueue, payload: OptimizePayload) -> Result<TaskId> {
    queue
        .enqueue(
            TYPE_IMAGE_OPTIMIZE,
            serde_json::to_value(&payload)?,
            TaskOptions::new().with_priority(1).with_max_retries(3),
        )
        .await
}

pub async fn enqueue_thumbnails(queue: &TaskQueue, payload: ThumbnailPayload) -> Result<TaskId> {
    queue
        .enqueue(
            TYPE_IMAGE_THUMBNAILS,
            serde_json::to_value(&payload)?,
            TaskOptions::new().with_priority(2).with_max_retries(3),
        )
        .await
}

/// Image pipeline backend (Stable-Diffusion stylization, mosaic rendering,
/// optimization). Consumed opaquely; implementations live outside this crate.
#[async_trait::async_trait]
pub trait ImageAdapter: Send + Sync {
    async fn process_image_with_style(&self, params: &ImageProcessPayload) -> anyhow::Result<()>;
    async fn process_image_with_ai(&self, params: &AiProcessPayload) -> anyhow::Result<()>;
    async fn generate_schema(&self, params: &SchemaPayload) -> anyhow::Result<()>;
    async fn optimize_image(&self, image_id: &str) -> anyhow::Result<()>;
    async fn generate_thumbnails(&self, image_id: &str, sizes: &[u32]) -> anyhow::Result<()>;
}

/// Outbound mail backend, consumed opaquely.
#[async_trait::async_trait]
pub trait EmailAdapter: Send + Sync {
    async fn send_schema(&self, address: &str, schema_url: &str, coupon_code: &str)
        -> anyhow::Result<()>;
}

pub struct ImageProcessHandler {
    pub images: Arc<dyn ImageAdapter>,
}

#[async_trait::async_trait]
impl TaskHandler for ImageProcessHandler {
    async fn handle(&self, _ctx: &JobContext, task: &Task) -> anyhow::Result<()> {
        let payload: ImageProcessPayload = serde_json::from_value(task.payload.clone())
            .context("invalid image:process payload")?;
        self.images.process_image_with_style(&payload).await
    }
}

pub struct AiProcessHandler {
    pub images: Arc<dyn ImageAdapter>,
}

#[async_trait::async_trait]
impl TaskHandler for AiProcessHandler {
    async fn handle(&self, _ctx: &JobContext, task: &Task) -> anyhow::Result<()> {
        let payload: AiProcessPayload = serde_json::from_value(task.payload.clone())
            .context("invalid image:ai_process payload")?;
        self.images.process_image_with_ai(&payload).await
    }
}

pub struct SchemaGenerateHandler {
    pub images: Arc<dyn ImageAdapter>,
}

#[async_trait::async_trait]
impl TaskHandler for SchemaGenerateHandler {
    async fn handle(&self, _ctx: &JobContext, task: &Task) -> anyhow::Result<()> {
        let payload: SchemaPayload = serde_json::from_value(task.payload.clone())
            .context("invalid schema:generate payload")?;
        self.images.generate_schema(&payload).await
    }
}

pub struct SchemaEmailHandler {
    pub email: Arc<dyn EmailAdapter>,
}

#[async_trait::async_trait]
impl TaskHandler for SchemaEmailHandler {
    async fn handle(&self, _ctx: &JobContext, task: &Task) -> anyhow::Result<()> {
        let payload: EmailPayload = serde_json::from_value(task.payload.clone())
            .context("invalid email:send_schema payload")?;
        self.email
            .send_schema(&payload.address, &payload.schema_url, &payload.coupon_code)
            .await
    }
}

pub struct ImageOptimizeHandler {
    pub images: Arc<dyn ImageAdapter>,
}

#[async_trait::async_trait]
impl TaskHandler for ImageOptimizeHandler {
    async fn handle(&self, _ctx: &JobContext, task: &Task) -> anyhow::Result<()> {
        let payload: OptimizePayload = serde_json::from_value(task.payload.clone())
            .context("invalid image:optimize payload")?;
        self.images.optimize_image(&payload.image_id).await
    }
}

pub struct ThumbnailHandler {
    pub images: Arc<dyn ImageAdapter>,
}

#[async_trait::async_trait]
impl TaskHandler for ThumbnailHandler {
    async fn handle(&self, _ctx: &JobContext, task: &Task) -> anyhow::Result<()> {
        let payload: ThumbnailPayload = serde_json::from_value(task.payload.clone())
            .context("invalid image:thumbnails payload")?;
        self.images
            .generate_thumbnails(&payload.image_id, &payload.sizes)
            .await
    }
}

/// The standard handler table for the order pipeline, shared by the built-in
/// queues and any ad hoc ones.
pub fn register_default_handlers(
    registry: &mut HandlerRegistry,
    images: Arc<dyn ImageAdapter>,
    email: Arc<dyn EmailAdapter>,
) {
    registry
        .register(
            TYPE_IMAGE_PROCESS,
            Arc::new(ImageProcessHandler {
                images: Arc::clone(&images),
            }),
        )
        .register(
            TYPE_AI_PROCESS,
            Arc::new(AiProcessHandler {
                images: Arc::clone(&images),
            }),
        )
        .register(
            TYPE_SCHEMA_GENERATE,
            Arc::new(SchemaGenerateHandler {
                images: Arc::clone(&images),
            }),
        )
        .register(TYPE_EMAIL_SCHEMA, Arc::new(SchemaEmailHandler { email }))
        .register(
            TYPE_IMAGE_OPTIMIZE,
            Arc::new(ImageOptimizeHandler {
                images: Arc::clone(&images),
            }),
        )
        .register(TYPE_IMAGE_THUMBNAILS, Arc::new(ThumbnailHandler { images }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_priority_pop_art_with_tuning() {
        // base 1, sensitive style +1, flat +3, lighting +1, contrast +1 = 7;
        // floor of 6 inactive since 7 >= 6.
        let p = ai_priority(1, "pop_art", Some(0.4), Some(0.8));
        assert_eq!(p, 7);
    }

    #[test]
    fn ai_priority_floor_of_six() {
        // base 0, plain style, no tuning: 0 + 3 = 3, clamped to 3, floored to 6.
        assert_eq!(ai_priority(0, "classic", None, None), 6);
        assert_eq!(ai_priority(1, "classic", None, None), 6);
    }

    #[test]
    fn ai_priority_clamps_at_ten() {
        assert_eq!(ai_priority(9, "oil_painting", Some(0.1), Some(0.2)), 10);
    }

    #[test]
    fn ai_priority_plain_style_gets_no_style_bump() {
        let sensitive = ai_priority(3, "watercolor", None, None);
        let plain = ai_priority(3, "classic", None, None);
        assert_eq!(sensitive, 7);
        assert_eq!(plain, 6);
    }

    #[test]
    fn ai_priority_sensitive_styles_all_bump() {
        for style in ["pop_art", "oil_painting", "watercolor", "stained_glass"] {
            assert_eq!(ai_priority(3, style, None, None), 7, "style {style}");
        }
    }

    #[test]
    fn reprocess_counter_is_domain_level() {
        let payload = ImageProcessPayload {
            image_id: "img-1".into(),
            style: "classic".into(),
            lighting: None,
            contrast: None,
            use_ai: false,
            reprocess_count: 0,
        };
        let raw = serde_json::to_value(&payload).unwrap();
        let back: ImageProcessPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(back.reprocess_count, 0);

        // Missing field defaults to zero for payloads produced before the
        // counter existed.
        let legacy: ImageProcessPayload = serde_json::from_value(serde_json::json!({
            "image_id": "img-2",
            "style": "pop_art"
        }))
        .unwrap();
        assert_eq!(legacy.reprocess_count, 0);
        assert!(!legacy.use_ai);
    }

    #[test]
    fn default_handler_table_covers_all_types() {
        struct FakeImages;
        #[async_trait::async_trait]
        impl ImageAdapter for FakeImages {
            async fn process_image_with_style(
                &self,
                _p: &ImageProcessPayload,
            ) -> anyhow::Result<()> {
                Ok(())
            }
            async fn process_image_with_ai(&self, _p: &AiProcessPayload) -> anyhow::Result<()> {
                Ok(())
            }
            async fn generate_schema(&self, _p: &SchemaPayload) -> anyhow::Result<()> {
                Ok(())
            }
            async fn optimize_image(&self, _id: &str) -> anyhow::Result<()> {
                Ok(())
            }
            async fn generate_thumbnails(&self, _id: &str, _s: &[u32]) -> anyhow::Result<()> {
                Ok(())
            }
        }
        struct FakeEmail;
        #[async_trait::async_trait]
        impl EmailAdapter for FakeEmail {
            async fn send_schema(&self, _a: &str, _u: &str, _c: &str) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut registry = HandlerRegistry::new();
        register_default_handlers(&mut registry, Arc::new(FakeImages), Arc::new(FakeEmail));

        for task_type in [
            TYPE_IMAGE_PROCESS,
            TYPE_AI_PROCESS,
            TYPE_SCHEMA_GENERATE,
            TYPE_EMAIL_SCHEMA,
            TYPE_IMAGE_OPTIMIZE,
            TYPE_IMAGE_THUMBNAILS,
        ] {
            assert!(registry.contains(task_type), "missing handler for {task_type}");
        }
    }
}
