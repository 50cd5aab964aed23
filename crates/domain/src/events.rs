//! 领域事件
//!
//! 事件在发生时构造，同步传递给所有订阅者后丢弃，不做持久化。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{QueueItem, QueueItemStatus};

/// 事件类型，用于订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Progress,
    BeforeStatusChange,
    StatusChanged,
    Tick,
    AliveAnnouncement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// 任务上报的执行进度
    QueueItemProgress {
        item_id: i64,
        queue_name: String,
        base_points: u32,
        occurred_at: DateTime<Utc>,
    },
    /// 状态写入前通知，处理器返回错误即否决本次转换
    BeforeQueueStatusChange {
        item: QueueItem,
        previous_status: QueueItemStatus,
        occurred_at: DateTime<Utc>,
    },
    /// 状态已提交
    QueueStatusChanged {
        item: QueueItem,
        previous_status: QueueItemStatus,
        occurred_at: DateTime<Utc>,
    },
    /// 调度器节拍
    Tick { at: DateTime<Utc> },
    /// 执行中任务的心跳
    AliveAnnouncement {
        item_id: i64,
        runner_id: String,
        occurred_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::QueueItemProgress { .. } => EventKind::Progress,
            Event::BeforeQueueStatusChange { .. } => EventKind::BeforeStatusChange,
            Event::QueueStatusChanged { .. } => EventKind::StatusChanged,
            Event::Tick { .. } => EventKind::Tick,
            Event::AliveAnnouncement { .. } => EventKind::AliveAnnouncement,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::QueueItemProgress { .. } => "QueueItemProgress",
            Event::BeforeQueueStatusChange { .. } => "BeforeQueueStatusChange",
            Event::QueueStatusChanged { .. } => "QueueStatusChanged",
            Event::Tick { .. } => "Tick",
            Event::AliveAnnouncement { .. } => "AliveAnnouncement",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Event::QueueItemProgress { occurred_at, .. }
            | Event::BeforeQueueStatusChange { occurred_at, .. }
            | Event::QueueStatusChanged { occurred_at, .. }
            | Event::AliveAnnouncement { occurred_at, .. } => *occurred_at,
            Event::Tick { at } => *at,
        }
    }

    /// 关联的队列项标识
    pub fn item_id(&self) -> Option<i64> {
        match self {
            Event::QueueItemProgress { item_id, .. } | Event::AliveAnnouncement { item_id, .. } => {
                Some(*item_id)
            }
            Event::BeforeQueueStatusChange { item, .. }
            | Event::QueueStatusChanged { item, .. } => item.id,
            Event::Tick { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_and_item_id() {
        let now = Utc::now();
        let mut item = QueueItem::new("orders", "", "T", json!({}), now);
        item.id = Some(3);

        let progress = Event::QueueItemProgress {
            item_id: 3,
            queue_name: "orders".into(),
            base_points: 500,
            occurred_at: now,
        };
        assert_eq!(progress.kind(), EventKind::Progress);
        assert_eq!(progress.item_id(), Some(3));

        let before = Event::BeforeQueueStatusChange {
            item,
            previous_status: QueueItemStatus::Queued,
            occurred_at: now,
        };
        assert_eq!(before.kind(), EventKind::BeforeStatusChange);
        assert_eq!(before.event_type(), "BeforeQueueStatusChange");
        assert_eq!(before.item_id(), Some(3));

        let tick = Event::Tick { at: now };
        assert_eq!(tick.kind(), EventKind::Tick);
        assert_eq!(tick.occurred_at(), now);
        assert_eq!(tick.item_id(), None);
    }
}
