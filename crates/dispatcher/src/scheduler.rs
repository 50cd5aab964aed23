//! 定时调度器
//!
//! `tick(now)` 由外部时间源周期性调用。每条计划记录最近一次成功入队的时间，
//! 只有入队成功后才推进，失败的计划会在下一次 tick 重新评估。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use shipqueue_core::{EventBus, QueueService};
use shipqueue_domain::{truncate_to_micros, Event, QueueItem};
use shipqueue_errors::{QueueError, QueueResult};
use shipqueue_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::entry::ScheduleEntry;

/// 一次 tick 的结果
#[derive(Debug, Default)]
pub struct TickReport {
    /// 计划名称与新建的队列项
    pub enqueued: Vec<(String, QueueItem)>,
    /// 计划名称与错误，`tick` 表示节拍事件处理器的错误
    pub errors: Vec<(String, QueueError)>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Scheduler {
    queue_service: Arc<QueueService>,
    event_bus: Arc<EventBus>,
    entries: Vec<ScheduleEntry>,
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
    metrics: MetricsCollector,
}

impl Scheduler {
    pub fn new(queue_service: Arc<QueueService>, event_bus: Arc<EventBus>) -> Self {
        Self {
            queue_service,
            event_bus,
            entries: Vec::new(),
            last_fired: Mutex::new(HashMap::new()),
            metrics: MetricsCollector::new(),
        }
    }

    /// 注册计划，名称必须唯一
    pub fn add_entry(&mut self, entry: ScheduleEntry) -> QueueResult<()> {
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err(QueueError::config_error(format!(
                "重复的计划名称: {}",
                entry.name
            )));
        }
        debug!(schedule.name = %entry.name, rule = ?entry.rule, "注册定时计划");
        self.entries.push(entry);
        Ok(())
    }

    pub fn with_entry(mut self, entry: ScheduleEntry) -> QueueResult<Self> {
        self.add_entry(entry)?;
        Ok(self)
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub async fn last_fired(&self, name: &str) -> Option<DateTime<Utc>> {
        self.last_fired.lock().await.get(name).copied()
    }

    /// 预置最近一次触发时间，例如进程重启后从外部记录恢复
    pub async fn restore_last_fired(&self, name: &str, at: DateTime<Utc>) {
        self.last_fired
            .lock()
            .await
            .insert(name.to_string(), truncate_to_micros(at));
    }

    /// 评估所有计划并为到期的计划入队
    ///
    /// 存储不可用时立即返回错误，其余单条计划的错误记录在报告中。
    /// 整个 tick 持有触发记录的锁，同一时刻的重复调用不会重复入队。
    #[instrument(skip(self), fields(entries = self.entries.len()))]
    pub async fn tick(&self, now: DateTime<Utc>) -> QueueResult<TickReport> {
        let mut report = TickReport::default();

        if let Err(e) = self.event_bus.publish(&Event::Tick { at: now }).await {
            warn!(error = %e, "节拍事件处理失败");
            report.errors.push(("tick".to_string(), e));
        }

        let mut last_fired = self.last_fired.lock().await;

        for entry in &self.entries {
            let previous = last_fired.get(&entry.name).copied();
            if !entry.rule.is_due(now, previous) {
                continue;
            }

            match self.fire(entry, now).await {
                Ok(item) => {
                    last_fired.insert(entry.name.clone(), now);
                    self.metrics.record_schedule_fired();
                    StructuredLogger::log_schedule_fired(&entry.name, &item);
                    report.enqueued.push((entry.name.clone(), item));
                }
                Err(e) if e.is_storage_unavailable() => {
                    self.metrics.record_schedule_failure();
                    warn!(schedule.name = %entry.name, error = %e, "存储不可用，中止本次调度");
                    return Err(e);
                }
                Err(e) => {
                    self.metrics.record_schedule_failure();
                    warn!(schedule.name = %entry.name, error = %e, "定时计划入队失败");
                    report.errors.push((entry.name.clone(), e));
                }
            }
        }

        Ok(report)
    }

    async fn fire(&self, entry: &ScheduleEntry, now: DateTime<Utc>) -> QueueResult<QueueItem> {
        let task = entry.build_task()?;
        let run_at = entry.delay.map(|delay| now + delay);
        self.queue_service
            .enqueue_at(
                entry.queue_name.as_deref(),
                task.as_ref(),
                &entry.context,
                run_at,
                now,
            )
            .await
    }
}
