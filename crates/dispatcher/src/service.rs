use std::sync::Arc;
use std::time::Duration;

use shipqueue_domain::utc_now;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::scheduler::Scheduler;

/// 以固定间隔调用 [`Scheduler::tick`]，直到收到停止信号
pub struct SchedulerService {
    scheduler: Arc<Scheduler>,
    tick_interval: Duration,
}

impl SchedulerService {
    pub fn new(scheduler: Arc<Scheduler>, tick_interval: Duration) -> Self {
        Self {
            scheduler,
            tick_interval: tick_interval.max(Duration::from_millis(1)),
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            entries = self.scheduler.entries().len(),
            tick_interval_seconds = self.tick_interval.as_secs(),
            "定时调度器已启动"
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scheduler.tick(utc_now()).await {
                        Ok(report) if !report.is_clean() => {
                            warn!(errors = report.errors.len(), "部分定时计划入队失败");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "调度节拍执行失败"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，定时调度器停止");
                    break;
                }
            }
        }
    }
}
