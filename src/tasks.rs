//! 内置维护任务

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipqueue_domain::{
    to_task_map, ExecutionConfig, NamedTask, QueueItemFilter, QueueItemStatus, QueueResult, Task,
    TaskContext, TaskExecutionError, TaskRegistry,
};
use tracing::info;

fn default_retention_days() -> u32 {
    7
}

fn default_statuses() -> Vec<QueueItemStatus> {
    vec![
        QueueItemStatus::Completed,
        QueueItemStatus::Failed,
        QueueItemStatus::Canceled,
    ]
}

/// 清理超过保留期的终态队列项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueCleanupTask {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_statuses")]
    pub statuses: Vec<QueueItemStatus>,
}

impl Default for QueueCleanupTask {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            statuses: default_statuses(),
        }
    }
}

impl QueueCleanupTask {
    pub fn new(retention_days: u32) -> Self {
        Self {
            retention_days,
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<QueueItemStatus>) -> Self {
        self.statuses = statuses;
        self
    }
}

impl NamedTask for QueueCleanupTask {
    const TASK_TYPE: &'static str = "QueueCleanupTask";
}

#[async_trait]
impl Task for QueueCleanupTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn to_serializable(&self) -> QueueResult<Value> {
        to_task_map(self)
    }

    fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig::default().with_queue_name("maintenance")
    }

    async fn execute(&self, ctx: &dyn TaskContext) -> Result<(), TaskExecutionError> {
        if let Some(status) = self.statuses.iter().find(|s| !s.is_terminal()) {
            return Err(TaskExecutionError::fatal(format!(
                "只能清理终态队列项，收到: {status}"
            )));
        }
        if self.statuses.is_empty() {
            return Ok(());
        }

        let cutoff = ctx.now() - Duration::days(i64::from(self.retention_days));
        let filter = QueueItemFilter::new()
            .with_statuses(&self.statuses)
            .finished_before(cutoff);
        let deleted = ctx.storage().delete_where(Some(&filter)).await?;

        info!(
            event = "queue_cleanup_finished",
            deleted,
            retention_days = self.retention_days,
            "已清理过期队列项"
        );
        Ok(())
    }
}

/// 二进制内置的任务类型
pub fn builtin_registry() -> TaskRegistry {
    TaskRegistry::new().with_type::<QueueCleanupTask>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_defaults() {
        let registry = builtin_registry();
        let task = registry
            .deserialize(QueueCleanupTask::TASK_TYPE, &json!({}))
            .unwrap();
        assert_eq!(task.task_type(), "QueueCleanupTask");
        assert_eq!(
            task.to_serializable().unwrap(),
            json!({"retention_days": 7, "statuses": ["completed", "failed", "canceled"]})
        );
    }

    #[test]
    fn test_payload_roundtrip() {
        let task = QueueCleanupTask::new(30).with_statuses(vec![QueueItemStatus::Failed]);
        let payload = task.to_serializable().unwrap();
        let restored: QueueCleanupTask = serde_json::from_value(payload).unwrap();
        assert_eq!(restored, task);
    }
}
