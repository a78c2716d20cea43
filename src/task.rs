// src/task.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task, generated at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Highest priority band. Priorities run 0..=10, higher served first.
pub const MAX_PRIORITY: u8 = 10;

/// A unit of deferred work.
///
/// The payload is a self-describing JSON envelope; the engine never inspects
/// it. Each handler deserializes the fields it needs and validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: u8,
    pub max_retries: u32,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            payload,
            priority: 0,
            max_retries: 3,
            retries: 0,
            created_at: Utc::now(),
            scheduled_at: None,
            processed_at: None,
            error: None,
        }
    }

    /// True if the task carries a schedule time that has not arrived yet.
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        matches!(self.scheduled_at, Some(at) if at > now)
    }

    /// Delay before the n-th retry: n squared minutes (1, 4, 9, ...).
    pub fn retry_backoff(retries: u32) -> Duration {
        Duration::minutes((retries as i64) * (retries as i64))
    }
}

/// Options applied to a task at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub priority: Option<u8>,
    pub max_retries: Option<u32>,
    pub delay: Option<Duration>,
    pub schedule_at: Option<DateTime<Utc>>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_schedule_at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule_at = Some(at);
        self
    }

    /// Fold the options into a freshly built task. An explicit schedule time
    /// wins over a relative delay when both are set.
    pub fn apply(self, task: &mut Task) {
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(max_retries) = self.max_retries {
            task.max_retries = max_retries;
        }
        if let Some(at) = self.schedule_at {
            task.scheduled_at = Some(at);
        } else if let Some(delay) = self.delay {
            task.scheduled_at = Some(Utc::now() + delay);
        }
    }
}
