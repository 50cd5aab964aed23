//! 队列运行指标
//!
//! 指标通过 `metrics` 门面记录，未安装导出器时所有记录都是空操作。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use shipqueue_domain::QueueItemStatus;

/// Metrics collector for runner and scheduler loops
#[derive(Clone)]
pub struct MetricsCollector {
    poll_cycles_total: Counter,
    poll_cycle_duration: Histogram,
    items_claimed_total: Counter,
    claim_conflicts_total: Counter,
    items_reclaimed_total: Counter,
    notification_failures_total: Counter,
    schedules_fired_total: Counter,
    schedule_failures_total: Counter,
    items_in_flight: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            poll_cycles_total: counter!("shipqueue_poll_cycles_total"),
            poll_cycle_duration: histogram!("shipqueue_poll_cycle_duration_seconds"),
            items_claimed_total: counter!("shipqueue_items_claimed_total"),
            claim_conflicts_total: counter!("shipqueue_claim_conflicts_total"),
            items_reclaimed_total: counter!("shipqueue_items_reclaimed_total"),
            notification_failures_total: counter!("shipqueue_notification_failures_total"),
            schedules_fired_total: counter!("shipqueue_schedules_fired_total"),
            schedule_failures_total: counter!("shipqueue_schedule_failures_total"),
            items_in_flight: gauge!("shipqueue_items_in_flight"),
        }
    }

    pub fn record_poll_cycle(&self, duration_seconds: f64) {
        self.poll_cycles_total.increment(1);
        self.poll_cycle_duration.record(duration_seconds);
    }

    pub fn record_claimed(&self) {
        self.items_claimed_total.increment(1);
    }

    pub fn record_claim_conflict(&self) {
        self.claim_conflicts_total.increment(1);
    }

    pub fn record_reclaimed(&self, count: u64) {
        self.items_reclaimed_total.increment(count);
    }

    /// 记录一次执行结束，按任务类型与最终状态打标签
    pub fn record_execution(&self, task_type: &str, status: QueueItemStatus, duration_seconds: f64) {
        counter!(
            "shipqueue_item_executions_total",
            "task_type" => task_type.to_string(),
            "status" => status.as_str()
        )
        .increment(1);
        histogram!(
            "shipqueue_item_execution_duration_seconds",
            "task_type" => task_type.to_string()
        )
        .record(duration_seconds);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures_total.increment(1);
    }

    pub fn record_schedule_fired(&self) {
        self.schedules_fired_total.increment(1);
    }

    pub fn record_schedule_failure(&self) {
        self.schedule_failures_total.increment(1);
    }

    pub fn set_in_flight(&self, count: usize) {
        self.items_in_flight.set(count as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
