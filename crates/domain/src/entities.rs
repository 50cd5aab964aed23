//! 队列项实体
//!
//! 队列项是任务的持久化执行记录，状态只能沿固定的状态机单调推进。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use shipqueue_errors::{QueueError, QueueResult};

use crate::value_objects::{DEFAULT_MAX_ATTEMPTS, MAX_PROGRESS_BASE_POINTS};

/// 当前UTC时间，截断到微秒
///
/// 存储层以微秒精度保存时间戳，CAS条件中的 `last_update_at` 必须能原样比对。
pub fn utc_now() -> DateTime<Utc> {
    truncate_to_micros(Utc::now())
}

pub fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// 队列项状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Scheduled,
    Queued,
    Running,
    Retrying,
    Completed,
    Failed,
    Canceled,
}

impl QueueItemStatus {
    pub const ALL: [QueueItemStatus; 7] = [
        QueueItemStatus::Scheduled,
        QueueItemStatus::Queued,
        QueueItemStatus::Running,
        QueueItemStatus::Retrying,
        QueueItemStatus::Completed,
        QueueItemStatus::Failed,
        QueueItemStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Scheduled => "scheduled",
            QueueItemStatus::Queued => "queued",
            QueueItemStatus::Running => "running",
            QueueItemStatus::Retrying => "retrying",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
            QueueItemStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Completed | QueueItemStatus::Failed | QueueItemStatus::Canceled
        )
    }

    /// 状态机允许的转换
    ///
    /// `running -> queued` 仅用于回收心跳超时的卡死队列项。
    pub fn can_transition_to(&self, next: QueueItemStatus) -> bool {
        use QueueItemStatus::*;
        matches!(
            (self, next),
            (Scheduled, Queued)
                | (Queued, Running)
                | (Running, Completed)
                | (Running, Retrying)
                | (Retrying, Queued)
                | (Running, Failed)
                | (Queued, Canceled)
                | (Scheduled, Canceled)
                | (Running, Canceled)
                | (Running, Queued)
        )
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueItemStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueItemStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QueueError::Serialization(format!("未知的队列项状态: {s}")))
    }
}

/// 队列项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// 存储分配的标识，为空表示尚未持久化
    pub id: Option<i64>,
    pub queue_name: String,
    /// 执行上下文（系统/租户标识）
    pub context: String,
    pub task_type: String,
    pub serialized_task: serde_json::Value,
    pub status: QueueItemStatus,
    pub priority: i32,
    pub retries: u32,
    pub max_attempts: u32,
    pub progress_base_points: u32,
    pub failure_description: Option<String>,
    pub runner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// scheduled/retrying 状态下最早可入队的时间
    pub scheduled_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 最近一次写入或心跳时间，参与CAS条件
    pub last_update_at: DateTime<Utc>,
}

impl QueueItem {
    /// 创建立即可执行的队列项
    pub fn new(
        queue_name: impl Into<String>,
        context: impl Into<String>,
        task_type: impl Into<String>,
        serialized_task: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let now = truncate_to_micros(now);
        Self {
            id: None,
            queue_name: queue_name.into(),
            context: context.into(),
            task_type: task_type.into(),
            serialized_task,
            status: QueueItemStatus::Queued,
            priority: 0,
            retries: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            progress_base_points: 0,
            failure_description: None,
            runner_id: None,
            created_at: now,
            scheduled_at: now,
            queued_at: Some(now),
            started_at: None,
            finished_at: None,
            last_update_at: now,
        }
    }

    /// 创建延迟到 `run_at` 才入队的队列项
    pub fn new_scheduled(
        queue_name: impl Into<String>,
        context: impl Into<String>,
        task_type: impl Into<String>,
        serialized_task: serde_json::Value,
        now: DateTime<Utc>,
        run_at: DateTime<Utc>,
    ) -> Self {
        let mut item = Self::new(queue_name, context, task_type, serialized_task, now);
        item.status = QueueItemStatus::Scheduled;
        item.scheduled_at = truncate_to_micros(run_at);
        item.queued_at = None;
        item
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 持久化后的标识
    pub fn require_id(&self) -> QueueResult<i64> {
        self.id
            .ok_or_else(|| QueueError::Internal("队列项尚未持久化".to_string()))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 当前执行是第几次尝试（从1开始）
    pub fn attempt(&self) -> u32 {
        self.retries + 1
    }

    /// 本次尝试失败后是否还能重试
    pub fn has_retry_budget(&self) -> bool {
        self.attempt() < self.max_attempts
    }

    /// 是否在 `now` 时已到可入队时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// 按状态机生成转换后的副本，不写入存储
    pub fn transitioned(&self, to: QueueItemStatus, now: DateTime<Utc>) -> QueueResult<QueueItem> {
        if !self.status.can_transition_to(to) {
            return Err(QueueError::invalid_transition(self.status, to));
        }

        let now = truncate_to_micros(now);
        let mut next = self.clone();
        next.status = to;
        next.last_update_at = now;

        match to {
            QueueItemStatus::Queued => {
                next.queued_at = Some(now);
                next.runner_id = None;
            }
            QueueItemStatus::Running => {
                next.started_at = Some(now);
                next.finished_at = None;
                next.progress_base_points = 0;
            }
            QueueItemStatus::Retrying => {
                next.retries += 1;
                next.runner_id = None;
            }
            QueueItemStatus::Completed => {
                next.progress_base_points = MAX_PROGRESS_BASE_POINTS;
                next.finished_at = Some(now);
            }
            QueueItemStatus::Failed | QueueItemStatus::Canceled => {
                next.finished_at = Some(now);
            }
            QueueItemStatus::Scheduled => {}
        }

        Ok(next)
    }

    /// 为终态队列项创建一条新的待执行记录
    pub fn requeued_copy(&self, now: DateTime<Utc>) -> QueueResult<QueueItem> {
        if !self.is_terminal() {
            return Err(QueueError::invalid_transition(
                self.status,
                QueueItemStatus::Queued,
            ));
        }
        Ok(QueueItem::new(
            self.queue_name.clone(),
            self.context.clone(),
            self.task_type.clone(),
            self.serialized_task.clone(),
            now,
        )
        .with_priority(self.priority)
        .with_max_attempts(self.max_attempts))
    }
}
