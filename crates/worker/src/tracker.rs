//! 执行中队列项的最新持久化快照
//!
//! 心跳与进度写入共用同一快照，每次写入都以快照的状态和更新时间为条件，
//! 成功后替换快照，保证后续状态转换使用正确的CAS前提。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shipqueue_domain::{truncate_to_micros, Condition, QueueItem, QueueStorage};
use shipqueue_errors::QueueResult;
use tokio::sync::Mutex;

pub struct ItemTracker {
    storage: Arc<dyn QueueStorage>,
    item: Mutex<QueueItem>,
}

impl ItemTracker {
    pub fn new(storage: Arc<dyn QueueStorage>, item: QueueItem) -> Self {
        Self {
            storage,
            item: Mutex::new(item),
        }
    }

    pub async fn snapshot(&self) -> QueueItem {
        self.item.lock().await.clone()
    }

    /// 刷新心跳时间
    pub async fn touch(&self, now: DateTime<Utc>) -> QueueResult<QueueItem> {
        self.write(now, |_| {}).await
    }

    /// 持久化进度并刷新心跳时间
    pub async fn record_progress(
        &self,
        base_points: u32,
        now: DateTime<Utc>,
    ) -> QueueResult<QueueItem> {
        self.write(now, |next| next.progress_base_points = base_points)
            .await
    }

    async fn write<F>(&self, now: DateTime<Utc>, apply: F) -> QueueResult<QueueItem>
    where
        F: FnOnce(&mut QueueItem),
    {
        let mut current = self.item.lock().await;
        let mut next = current.clone();
        apply(&mut next);
        // 同一微秒内的两次写入需要不同的条件值
        let now = truncate_to_micros(now);
        next.last_update_at = if now > current.last_update_at {
            now
        } else {
            current.last_update_at + chrono::Duration::microseconds(1)
        };

        let saved = self
            .storage
            .save_with_condition(&next, &Condition::snapshot_of(&current))
            .await?;
        *current = saved.clone();
        Ok(saved)
    }
}
