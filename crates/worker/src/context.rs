//! 任务执行上下文与进度持久化

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shipqueue_core::{EventBus, EventHandler};
use shipqueue_domain::{
    utc_now, Event, QueueItem, QueueItemStatus, QueueStorage, TaskContext,
    MAX_PROGRESS_BASE_POINTS,
};
use shipqueue_errors::{QueueError, QueueResult};
use tracing::debug;

use crate::tracker::ItemTracker;

/// 运行器提供给任务的上下文
pub struct RunnerTaskContext {
    item_id: i64,
    queue_name: String,
    context: String,
    attempt: u32,
    runner_id: String,
    tracker: Arc<ItemTracker>,
    event_bus: Arc<EventBus>,
    storage: Arc<dyn QueueStorage>,
    last_progress: AtomicU32,
    progress_reported: AtomicBool,
}

impl RunnerTaskContext {
    pub fn new(
        item: &QueueItem,
        tracker: Arc<ItemTracker>,
        event_bus: Arc<EventBus>,
        storage: Arc<dyn QueueStorage>,
        runner_id: impl Into<String>,
    ) -> QueueResult<Self> {
        Ok(Self {
            item_id: item.require_id()?,
            queue_name: item.queue_name.clone(),
            context: item.context.clone(),
            attempt: item.attempt(),
            runner_id: runner_id.into(),
            tracker,
            event_bus,
            storage,
            last_progress: AtomicU32::new(0),
            progress_reported: AtomicBool::new(false),
        })
    }

    /// 最近一次上报的进度
    pub fn last_progress(&self) -> u32 {
        self.last_progress.load(Ordering::Acquire)
    }

    /// 写入心跳并发布存活通知
    pub(crate) async fn heartbeat(&self) -> QueueResult<()> {
        let saved = self.tracker.touch(utc_now()).await?;
        self.event_bus
            .publish(&Event::AliveAnnouncement {
                item_id: self.item_id,
                runner_id: self.runner_id.clone(),
                occurred_at: saved.last_update_at,
            })
            .await
    }
}

#[async_trait]
impl TaskContext for RunnerTaskContext {
    fn item_id(&self) -> i64 {
        self.item_id
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn context(&self) -> &str {
        &self.context
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn report_progress(&self, base_points: u32) -> QueueResult<()> {
        if base_points > MAX_PROGRESS_BASE_POINTS {
            return Err(QueueError::InvalidProgress(format!(
                "进度 {base_points} 超过上限 {MAX_PROGRESS_BASE_POINTS}"
            )));
        }

        let last = self.last_progress();
        if base_points < last {
            return Err(QueueError::InvalidProgress(format!(
                "进度不能回退: {last} -> {base_points}"
            )));
        }
        if base_points == last && self.progress_reported.load(Ordering::Acquire) {
            return Ok(());
        }

        self.last_progress.store(base_points, Ordering::Release);
        self.progress_reported.store(true, Ordering::Release);

        self.event_bus
            .publish(&Event::QueueItemProgress {
                item_id: self.item_id,
                queue_name: self.queue_name.clone(),
                base_points,
                occurred_at: utc_now(),
            })
            .await
    }

    async fn report_alive(&self) -> QueueResult<()> {
        self.heartbeat().await
    }

    async fn is_canceled(&self) -> QueueResult<bool> {
        let stored = self.storage.find_by_id(self.item_id).await?;
        Ok(stored.map_or(true, |item| item.status == QueueItemStatus::Canceled))
    }

    fn storage(&self) -> Arc<dyn QueueStorage> {
        Arc::clone(&self.storage)
    }
}

/// 把单个队列项的进度事件写入存储
///
/// 只处理 `item_id` 匹配的事件；写入冲突说明队列项已被取消或回收，忽略即可。
pub struct ProgressPersister {
    item_id: i64,
    tracker: Arc<ItemTracker>,
}

impl ProgressPersister {
    pub fn new(item_id: i64, tracker: Arc<ItemTracker>) -> Self {
        Self { item_id, tracker }
    }
}

#[async_trait]
impl EventHandler for ProgressPersister {
    fn handler_name(&self) -> &str {
        "progress_persister"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let Event::QueueItemProgress {
            item_id,
            base_points,
            occurred_at,
            ..
        } = event
        else {
            return Ok(());
        };
        if *item_id != self.item_id {
            return Ok(());
        }

        match self.tracker.record_progress(*base_points, *occurred_at).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!(queue_item.id = item_id, error = %e, "进度写入冲突，跳过");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shipqueue_domain::{Condition, EventKind};
    use shipqueue_infrastructure::InMemoryQueueStorage;
    use std::sync::Mutex;

    struct Fixture {
        storage: Arc<dyn QueueStorage>,
        bus: Arc<EventBus>,
        ctx: RunnerTaskContext,
        item: QueueItem,
    }

    async fn fixture() -> Fixture {
        let storage: Arc<dyn QueueStorage> = Arc::new(InMemoryQueueStorage::new());
        let bus = Arc::new(EventBus::new());
        let now = utc_now();
        let saved = storage
            .save_with_condition(&QueueItem::new("q", "tenant", "T", json!({}), now), &[])
            .await
            .unwrap();
        let item = storage
            .save_with_condition(
                &saved.transitioned(QueueItemStatus::Running, now).unwrap(),
                &Condition::snapshot_of(&saved),
            )
            .await
            .unwrap();
        let id = item.id.unwrap();
        let tracker = Arc::new(ItemTracker::new(Arc::clone(&storage), item.clone()));
        bus.subscribe(
            EventKind::Progress,
            Arc::new(ProgressPersister::new(id, Arc::clone(&tracker))),
        )
        .await;
        let ctx = RunnerTaskContext::new(
            &item,
            tracker,
            Arc::clone(&bus),
            Arc::clone(&storage),
            "runner-1",
        )
        .unwrap();
        Fixture {
            storage,
            bus,
            ctx,
            item,
        }
    }

    #[tokio::test]
    async fn test_progress_is_persisted_and_monotonic() {
        let f = fixture().await;
        f.ctx.report_progress(1000).await.unwrap();
        f.ctx.report_progress_percent(50.0).await.unwrap();

        let stored = f.storage.find_by_id(f.item.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.progress_base_points, 5000);

        let err = f.ctx.report_progress(4000).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidProgress(_)));
        let err = f.ctx.report_progress(10_001).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidProgress(_)));
    }

    #[tokio::test]
    async fn test_duplicate_progress_is_coalesced() {
        let f = fixture().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f.bus
            .subscribe_fn(EventKind::Progress, "recorder", move |event| {
                if let Event::QueueItemProgress { base_points, .. } = event {
                    sink.lock().unwrap().push(*base_points);
                }
                Ok(())
            })
            .await;

        for value in [0, 0, 3000, 3000, 10_000] {
            f.ctx.report_progress(value).await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 3000, 10_000]);
    }

    #[tokio::test]
    async fn test_heartbeat_announces_alive() {
        let f = fixture().await;
        let runners = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&runners);
        f.bus
            .subscribe_fn(EventKind::AliveAnnouncement, "alive", move |event| {
                if let Event::AliveAnnouncement { runner_id, .. } = event {
                    sink.lock().unwrap().push(runner_id.clone());
                }
                Ok(())
            })
            .await;

        f.ctx.report_alive().await.unwrap();
        assert_eq!(*runners.lock().unwrap(), vec!["runner-1".to_string()]);

        let stored = f.storage.find_by_id(f.item.id.unwrap()).await.unwrap().unwrap();
        assert!(stored.last_update_at > f.item.last_update_at);
    }

    #[tokio::test]
    async fn test_cancellation_is_visible_to_task() {
        let f = fixture().await;
        assert!(!f.ctx.is_canceled().await.unwrap());

        let current = f.storage.find_by_id(f.item.id.unwrap()).await.unwrap().unwrap();
        let canceled = current
            .transitioned(QueueItemStatus::Canceled, utc_now())
            .unwrap();
        f.storage
            .save_with_condition(&canceled, &Condition::snapshot_of(&current))
            .await
            .unwrap();

        assert!(f.ctx.is_canceled().await.unwrap());
        // 取消后的进度写入冲突被忽略
        f.ctx.report_progress(2000).await.unwrap();
    }
}
