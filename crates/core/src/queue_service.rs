//! 队列服务：入队、取消、重新入队与查询

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shipqueue_domain::{
    truncate_to_micros, utc_now, QueueItem, QueueItemFilter, QueueItemStatus, QueueStorage, Task,
    TaskRegistry, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_NAME,
};
use metrics::counter;
use shipqueue_errors::{QueueError, QueueResult};
use tracing::{error, info};

use crate::event_bus::EventBus;
use crate::transition::StatusTransitioner;

/// 任务未提供执行提示时使用的默认值
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueDefaults {
    pub queue_name: String,
    pub max_attempts: u32,
}

impl Default for EnqueueDefaults {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

pub struct QueueService {
    storage: Arc<dyn QueueStorage>,
    registry: Arc<TaskRegistry>,
    transitioner: StatusTransitioner,
    defaults: EnqueueDefaults,
}

impl QueueService {
    pub fn new(
        storage: Arc<dyn QueueStorage>,
        event_bus: Arc<EventBus>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            transitioner: StatusTransitioner::new(Arc::clone(&storage), event_bus),
            storage,
            registry,
            defaults: EnqueueDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: EnqueueDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn storage(&self) -> Arc<dyn QueueStorage> {
        Arc::clone(&self.storage)
    }

    /// 立即入队
    ///
    /// 队列名称优先取参数，其次取任务的执行提示，最后使用默认队列。
    pub async fn enqueue(
        &self,
        queue_name: Option<&str>,
        task: &dyn Task,
        context: &str,
    ) -> QueueResult<QueueItem> {
        self.enqueue_at(queue_name, task, context, None, utc_now())
            .await
    }

    /// 延迟 `delay` 后再进入 queued 状态
    pub async fn enqueue_delayed(
        &self,
        queue_name: Option<&str>,
        task: &dyn Task,
        context: &str,
        delay: Duration,
    ) -> QueueResult<QueueItem> {
        let now = utc_now();
        self.enqueue_at(queue_name, task, context, Some(now + delay), now)
            .await
    }

    /// 以给定的当前时间入队，`run_at` 晚于 `now` 时创建 scheduled 队列项
    pub async fn enqueue_at(
        &self,
        queue_name: Option<&str>,
        task: &dyn Task,
        context: &str,
        run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> QueueResult<QueueItem> {
        let task_type = task.task_type();
        if !self.registry.contains(task_type) {
            return Err(QueueError::unknown_task_type(task_type));
        }

        let config = task.execution_config();
        let queue_name = queue_name
            .map(str::to_string)
            .or(config.queue_name)
            .unwrap_or_else(|| self.defaults.queue_name.clone());
        let payload = task.to_serializable()?;

        let item = match run_at {
            Some(run_at) if truncate_to_micros(run_at) > truncate_to_micros(now) => {
                QueueItem::new_scheduled(queue_name, context, task_type, payload, now, run_at)
            }
            _ => QueueItem::new(queue_name, context, task_type, payload, now),
        }
        .with_priority(config.priority.unwrap_or_default())
        .with_max_attempts(config.max_attempts.unwrap_or(self.defaults.max_attempts));

        let saved = self.storage.save_with_condition(&item, &[]).await?;
        counter!("shipqueue_items_enqueued_total", "task_type" => saved.task_type.clone())
            .increment(1);

        info!(
            event = "queue_item_enqueued",
            queue_item.id = ?saved.id,
            queue.name = %saved.queue_name,
            task.type = %saved.task_type,
            status = %saved.status,
            "任务已入队"
        );

        Ok(saved)
    }

    /// 取消队列项
    ///
    /// 只允许从 scheduled/queued/running 取消；正在执行的任务不会被中断，
    /// 由任务在安全点自行检查取消标记。
    pub async fn cancel(&self, id: i64) -> QueueResult<QueueItem> {
        let current = self
            .storage
            .find_by_id(id)
            .await?
            .ok_or_else(|| QueueError::item_not_found(id))?;

        let next = current.transitioned(QueueItemStatus::Canceled, utc_now())?;
        let committed = self.transitioner.commit(&current, next).await?;
        if let Some(e) = &committed.notification_error {
            error!(queue_item.id = id, error = %e, "取消后的状态通知处理失败");
        }
        counter!("shipqueue_items_canceled_total").increment(1);

        info!(
            event = "queue_item_canceled",
            queue_item.id = id,
            status.from = %current.status,
            "队列项已取消"
        );

        Ok(committed.item)
    }

    /// 基于终态队列项创建新的队列项，原记录保持不变
    pub async fn requeue(&self, id: i64) -> QueueResult<QueueItem> {
        let original = self
            .storage
            .find_by_id(id)
            .await?
            .ok_or_else(|| QueueError::item_not_found(id))?;

        let copy = original.requeued_copy(utc_now())?;
        let saved = self.storage.save_with_condition(&copy, &[]).await?;

        info!(
            event = "queue_item_requeued",
            queue_item.id = ?saved.id,
            original.id = id,
            "队列项已重新入队"
        );

        Ok(saved)
    }

    pub async fn find_item(&self, id: i64) -> QueueResult<Option<QueueItem>> {
        self.storage.find_by_id(id).await
    }

    pub async fn find_items(&self, filter: &QueueItemFilter) -> QueueResult<Vec<QueueItem>> {
        self.storage.find(filter).await
    }
}
