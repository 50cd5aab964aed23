//! Test data builders

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use shipqueue_domain::{QueueItem, QueueItemStatus};

/// Builder for queue items with sensible defaults
pub struct QueueItemBuilder {
    item: QueueItem,
}

impl QueueItemBuilder {
    pub fn new() -> Self {
        Self {
            item: QueueItem::new("default", "test", "ProgressTask", json!({"steps": 1}), Utc::now()),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.item.id = Some(id);
        self
    }

    pub fn with_queue_name(mut self, queue_name: &str) -> Self {
        self.item.queue_name = queue_name.to_string();
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.item.context = context.to_string();
        self
    }

    pub fn with_task(mut self, task_type: &str, payload: Value) -> Self {
        self.item.task_type = task_type.to_string();
        self.item.serialized_task = payload;
        self
    }

    pub fn with_status(mut self, status: QueueItemStatus) -> Self {
        self.item.status = status;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.item.retries = retries;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.item.max_attempts = max_attempts;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.item.priority = priority;
        self
    }

    pub fn with_runner_id(mut self, runner_id: &str) -> Self {
        self.item.runner_id = Some(runner_id.to_string());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.item.created_at = at;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.item.scheduled_at = at;
        self
    }

    pub fn last_update_at(mut self, at: DateTime<Utc>) -> Self {
        self.item.last_update_at = at;
        self
    }

    pub fn finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.item.finished_at = Some(at);
        self
    }

    pub fn build(self) -> QueueItem {
        self.item
    }
}

impl Default for QueueItemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
