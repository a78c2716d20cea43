// src/lib.rs
//! mosaiq: the Redis-backed task engine behind mosaic-art order fulfillment.
//!
//! A multi-priority persistent work queue with delayed/scheduled execution,
//! quadratic-backoff retries and completed/failed archival, plus the typed
//! job constructors and the manager that runs the named queues together.

pub mod error;
pub mod handler;
pub mod jobs;
pub mod lua;
pub mod manager;
pub mod queue;
pub mod store;
pub mod task;

pub use error::{QueueError, Result};
pub use handler::{HandlerRegistry, JobContext, TaskHandler};
pub use jobs::{EmailAdapter, ImageAdapter};
pub use lua::LuaScripts;
pub use manager::{QueueManager, AI_IMAGES_QUEUE, IMAGES_QUEUE};
pub use queue::{QueueStats, TaskQueue, DISPATCH_POLL_TIMEOUT, SWEEP_INTERVAL};
pub use store::Store;
pub use task::{Task, TaskId, TaskOptions, MAX_PRIORITY};

// Re-export commonly used types
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
