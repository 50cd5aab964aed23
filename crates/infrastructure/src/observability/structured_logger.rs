//! Structured logging helpers
//!
//! 队列生命周期中的关键节点统一以 `event` 字段标记，便于按事件检索 JSON 日志。

use chrono::{DateTime, Utc};
use shipqueue_domain::{QueueItem, QueueItemStatus};
use tracing::{debug, error, info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_item_claimed(item: &QueueItem, runner_id: &str) {
        info!(
            event = "queue_item_claimed",
            queue_item.id = ?item.id,
            queue.name = %item.queue_name,
            task.type = %item.task_type,
            task.attempt = item.attempt(),
            runner.id = runner_id,
            "队列项已被认领"
        );
    }

    pub fn log_status_transition(item: &QueueItem, from: QueueItemStatus, duration_ms: Option<u64>) {
        match item.status {
            QueueItemStatus::Failed => error!(
                event = "queue_item_status_changed",
                queue_item.id = ?item.id,
                queue.name = %item.queue_name,
                task.type = %item.task_type,
                status.from = %from,
                status.to = %item.status,
                task.duration_ms = ?duration_ms,
                task.error = item.failure_description.as_deref().unwrap_or("未知错误"),
                "队列项执行失败"
            ),
            _ => info!(
                event = "queue_item_status_changed",
                queue_item.id = ?item.id,
                queue.name = %item.queue_name,
                task.type = %item.task_type,
                status.from = %from,
                status.to = %item.status,
                task.duration_ms = ?duration_ms,
                "队列项状态变更"
            ),
        }
    }

    pub fn log_retry_scheduled(item: &QueueItem, error_message: &str) {
        warn!(
            event = "queue_item_retry_scheduled",
            queue_item.id = ?item.id,
            task.type = %item.task_type,
            task.retries = item.retries,
            task.max_attempts = item.max_attempts,
            retry.at = %item.scheduled_at,
            task.error = error_message,
            "队列项将在退避后重试"
        );
    }

    pub fn log_item_reclaimed(item: &QueueItem, stale_since: DateTime<Utc>) {
        warn!(
            event = "queue_item_reclaimed",
            queue_item.id = ?item.id,
            queue.name = %item.queue_name,
            status.to = %item.status,
            task.retries = item.retries,
            heartbeat.last = %stale_since,
            "回收心跳超时的队列项"
        );
    }

    pub fn log_schedule_fired(schedule_name: &str, item: &QueueItem) {
        info!(
            event = "schedule_fired",
            schedule.name = schedule_name,
            queue_item.id = ?item.id,
            queue.name = %item.queue_name,
            task.type = %item.task_type,
            "定时计划已触发"
        );
    }

    pub fn log_poll_cycle(runner_id: &str, promoted: usize, reclaimed: usize, claimed: usize) {
        if promoted + reclaimed + claimed == 0 {
            debug!(event = "poll_cycle", runner.id = runner_id, "本轮轮询无可处理队列项");
            return;
        }
        info!(
            event = "poll_cycle",
            runner.id = runner_id,
            items.promoted = promoted,
            items.reclaimed = reclaimed,
            items.claimed = claimed,
            "轮询周期完成"
        );
    }
}
