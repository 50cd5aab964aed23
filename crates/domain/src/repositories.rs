//! 队列存储抽象
//!
//! 存储是跨进程协调的唯一事实来源，所有并发控制都依赖条件写入。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shipqueue_errors::QueueResult;

use crate::entities::{QueueItem, QueueItemStatus};

/// 条件写入的前置条件，全部条件需在写入时原子成立
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Status(QueueItemStatus),
    LastUpdateAt(DateTime<Utc>),
    /// 写入项所在队列中没有其他 running 项，跨行条件由存储实现在写入时检查
    NoOtherRunningInQueue,
}

impl Condition {
    pub fn holds_for(&self, stored: &QueueItem) -> bool {
        match self {
            Condition::Status(status) => stored.status == *status,
            Condition::LastUpdateAt(at) => stored.last_update_at == *at,
            Condition::NoOtherRunningInQueue => true,
        }
    }

    /// 以当前快照的状态和心跳时间作为前置条件
    pub fn snapshot_of(item: &QueueItem) -> Vec<Condition> {
        vec![
            Condition::Status(item.status),
            Condition::LastUpdateAt(item.last_update_at),
        ]
    }

    /// 状态转换写入的前置条件：快照条件，进入 running 时再要求队列空闲
    pub fn for_transition(current: &QueueItem, next: &QueueItem) -> Vec<Condition> {
        let mut conditions = Self::snapshot_of(current);
        if next.status == QueueItemStatus::Running && current.status != QueueItemStatus::Running {
            conditions.push(Condition::NoOtherRunningInQueue);
        }
        conditions
    }
}

/// 队列项查询过滤条件，未设置的字段不参与过滤
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueItemFilter {
    pub statuses: Vec<QueueItemStatus>,
    pub queue_name: Option<String>,
    pub task_type: Option<String>,
    pub context: Option<String>,
    pub scheduled_before: Option<DateTime<Utc>>,
    pub last_update_before: Option<DateTime<Utc>>,
    pub finished_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl QueueItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(mut self, statuses: &[QueueItemStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_status(self, status: QueueItemStatus) -> Self {
        self.with_statuses(&[status])
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// `scheduled_at <= at`
    pub fn scheduled_before(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_before = Some(at);
        self
    }

    /// `last_update_at < at`
    pub fn last_update_before(mut self, at: DateTime<Utc>) -> Self {
        self.last_update_before = Some(at);
        self
    }

    /// `finished_at < at`，未结束的队列项不匹配
    pub fn finished_before(mut self, at: DateTime<Utc>) -> Self {
        self.finished_before = Some(at);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, item: &QueueItem) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&item.status) {
            return false;
        }
        if let Some(queue_name) = &self.queue_name {
            if &item.queue_name != queue_name {
                return false;
            }
        }
        if let Some(task_type) = &self.task_type {
            if &item.task_type != task_type {
                return false;
            }
        }
        if let Some(context) = &self.context {
            if &item.context != context {
                return false;
            }
        }
        if let Some(at) = self.scheduled_before {
            if item.scheduled_at > at {
                return false;
            }
        }
        if let Some(at) = self.last_update_before {
            if item.last_update_at >= at {
                return false;
            }
        }
        if let Some(at) = self.finished_before {
            match item.finished_at {
                Some(finished_at) if finished_at < at => {}
                _ => return false,
            }
        }
        true
    }
}

/// 队列存储契约
#[async_trait]
pub trait QueueStorage: Send + Sync {
    /// 每个队列最多返回一个最早创建的 queued 队列项，且该队列当前没有 running 项
    ///
    /// 同一队列内按创建时间、再按标识排序；跨队列按优先级降序后按创建顺序截取 `limit` 个。
    async fn find_oldest_queued_per_queue(&self, limit: usize) -> QueueResult<Vec<QueueItem>>;

    /// 无标识时插入，有标识时按条件原子更新，条件不成立返回 `Conflict`
    async fn save_with_condition(
        &self,
        item: &QueueItem,
        conditions: &[Condition],
    ) -> QueueResult<QueueItem>;

    /// 按过滤条件批量删除，`None` 删除全部
    async fn delete_where(&self, filter: Option<&QueueItemFilter>) -> QueueResult<u64>;

    async fn find_by_id(&self, id: i64) -> QueueResult<Option<QueueItem>>;

    /// 结果按标识升序
    async fn find(&self, filter: &QueueItemFilter) -> QueueResult<Vec<QueueItem>>;

    async fn count(&self, filter: &QueueItemFilter) -> QueueResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_conditions() {
        let now = Utc::now();
        let item = QueueItem::new("q", "", "T", json!({}), now);
        let conditions = Condition::snapshot_of(&item);
        assert!(conditions.iter().all(|c| c.holds_for(&item)));

        let mut moved = item.clone();
        moved.last_update_at = item.last_update_at + Duration::seconds(1);
        assert!(!Condition::LastUpdateAt(item.last_update_at).holds_for(&moved));
        assert!(Condition::Status(QueueItemStatus::Queued).holds_for(&moved));
    }

    #[test]
    fn test_claim_requires_idle_queue() {
        let now = Utc::now();
        let item = QueueItem::new("q", "", "T", json!({}), now);
        let running = item.transitioned(QueueItemStatus::Running, now).unwrap();
        assert!(Condition::for_transition(&item, &running)
            .contains(&Condition::NoOtherRunningInQueue));

        let heartbeat = running.clone();
        assert_eq!(
            Condition::for_transition(&running, &heartbeat),
            Condition::snapshot_of(&running)
        );
        let done = running.transitioned(QueueItemStatus::Completed, now).unwrap();
        assert!(!Condition::for_transition(&running, &done)
            .contains(&Condition::NoOtherRunningInQueue));
    }

    #[test]
    fn test_filter_matching() {
        let now = Utc::now();
        let mut item = QueueItem::new("orders", "shop", "T", json!({}), now);

        assert!(QueueItemFilter::new().matches(&item));
        assert!(QueueItemFilter::new()
            .with_status(QueueItemStatus::Queued)
            .with_queue_name("orders")
            .with_context("shop")
            .matches(&item));
        assert!(!QueueItemFilter::new().with_task_type("Other").matches(&item));
        assert!(!QueueItemFilter::new()
            .last_update_before(item.last_update_at)
            .matches(&item));
        assert!(!QueueItemFilter::new().finished_before(now).matches(&item));

        item.finished_at = Some(now - Duration::days(2));
        assert!(QueueItemFilter::new()
            .finished_before(now - Duration::days(1))
            .matches(&item));
    }
}
