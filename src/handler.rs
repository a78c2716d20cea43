// src/handler.rs
use crate::{Task, TaskId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Span;

/// Context handed to a handler for one task execution.
pub struct JobContext {
    pub task_id: TaskId,
    pub queue: String,
    pub span: Span,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(task: &Task, queue: impl Into<String>, cancelled: Arc<AtomicBool>) -> Self {
        let queue = queue.into();
        let span = tracing::info_span!(
            "task_execution",
            task_id = %task.id,
            task_type = %task.task_type,
            queue = %queue,
        );

        Self {
            task_id: task.id.clone(),
            queue,
            span,
            cancelled,
        }
    }

    /// True once the owning queue has been closed. Long-running handlers
    /// should poll this at convenient points; the engine never kills them.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Caller-supplied work function for one task type.
///
/// `Ok(())` marks the task completed; any error is captured verbatim into
/// the task's error field and routed through retry/backoff. The payload is
/// read-only input; each handler validates its own fields.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &JobContext, task: &Task) -> anyhow::Result<()>;
}

/// Per-queue mapping of task type to handler, built at worker start.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> &mut Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
