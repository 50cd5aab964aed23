//! 队列项状态转换提交
//!
//! 每次转换先发布写入前通知（处理器可通过返回错误否决），
//! 再以当前快照的状态和心跳时间为条件写入，最后发布已提交通知。

use std::sync::Arc;

use shipqueue_domain::{Condition, Event, QueueItem, QueueStorage};
use shipqueue_errors::{QueueError, QueueResult};
use tracing::debug;

use crate::event_bus::EventBus;

/// 已提交的转换
#[derive(Debug)]
pub struct CommittedTransition {
    pub item: QueueItem,
    /// 提交后通知的处理器错误，写入不会因此回滚
    pub notification_error: Option<QueueError>,
}

#[derive(Clone)]
pub struct StatusTransitioner {
    storage: Arc<dyn QueueStorage>,
    event_bus: Arc<EventBus>,
}

impl StatusTransitioner {
    pub fn new(storage: Arc<dyn QueueStorage>, event_bus: Arc<EventBus>) -> Self {
        Self { storage, event_bus }
    }

    pub fn storage(&self) -> &Arc<dyn QueueStorage> {
        &self.storage
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// 把 `current`（最近一次读到或写入的快照）推进为 `next`
    ///
    /// 写入前通知失败时不写存储并返回 `EventHandler` 错误；
    /// 存储中的状态或心跳时间已变化时返回 `Conflict`。
    pub async fn commit(
        &self,
        current: &QueueItem,
        next: QueueItem,
    ) -> QueueResult<CommittedTransition> {
        if !current.status.can_transition_to(next.status) {
            return Err(QueueError::invalid_transition(current.status, next.status));
        }

        let previous_status = current.status;
        let occurred_at = next.last_update_at;

        self.event_bus
            .publish(&Event::BeforeQueueStatusChange {
                item: next.clone(),
                previous_status,
                occurred_at,
            })
            .await?;

        let saved = self
            .storage
            .save_with_condition(&next, &Condition::for_transition(current, &next))
            .await?;

        debug!(
            queue_item.id = ?saved.id,
            status.from = %previous_status,
            status.to = %saved.status,
            "队列项状态已提交"
        );

        let notification_error = self
            .event_bus
            .publish(&Event::QueueStatusChanged {
                item: saved.clone(),
                previous_status,
                occurred_at,
            })
            .await
            .err();

        Ok(CommittedTransition {
            item: saved,
            notification_error,
        })
    }
}
