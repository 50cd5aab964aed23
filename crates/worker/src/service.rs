use std::sync::Arc;
use std::time::Duration;

use shipqueue_domain::utc_now;
use shipqueue_errors::QueueResult;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::runner::{ItemOutcome, PollCycleReport, TaskRunner};

/// 按固定间隔驱动轮询，直到收到停止信号
///
/// 认领的队列项在后台执行，每次 tick 按空余的并发额度继续认领，
/// 一个队列上的慢任务不会阻塞其他队列。
pub struct RunnerService {
    runner: Arc<TaskRunner>,
    poll_interval: Duration,
}

impl RunnerService {
    pub fn new(runner: Arc<TaskRunner>, poll_interval: Duration) -> Self {
        Self {
            runner,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    /// 运行轮询循环
    ///
    /// 存储不可用只记录日志，下一次 tick 会重新尝试。停止后等待已认领的队列项执行结束。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            runner.id = self.runner.runner_id(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "任务运行器已启动"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: JoinSet<QueueResult<ItemOutcome>> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.claim_into(&mut in_flight).await;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.settle(joined);
                    self.runner.set_in_flight(in_flight.len());
                }
                _ = shutdown_rx.recv() => {
                    info!(runner.id = self.runner.runner_id(), "收到关闭信号，任务运行器停止认领");
                    break;
                }
            }
        }

        if !in_flight.is_empty() {
            info!(remaining = in_flight.len(), "等待执行中的队列项结束");
        }
        while let Some(joined) = in_flight.join_next().await {
            self.settle(joined);
        }
        self.runner.set_in_flight(0);
        info!(runner.id = self.runner.runner_id(), "任务运行器已停止");
    }

    async fn claim_into(&self, in_flight: &mut JoinSet<QueueResult<ItemOutcome>>) {
        let config = self.runner.config();
        let capacity = config
            .max_concurrent_items
            .saturating_sub(in_flight.len())
            .min(config.max_items_per_poll);

        match self.runner.prepare_cycle(utc_now(), capacity).await {
            Ok((_, claimed)) => {
                for item in claimed {
                    let runner = Arc::clone(&self.runner);
                    in_flight.spawn(async move { runner.execute_claimed(item).await });
                }
                self.runner.set_in_flight(in_flight.len());
            }
            Err(e) if e.is_storage_unavailable() => {
                warn!(error = %e, "存储不可用，跳过本轮轮询");
            }
            Err(e) => {
                error!(error = %e, "轮询周期执行失败");
            }
        }
    }

    fn settle(&self, joined: Result<QueueResult<ItemOutcome>, tokio::task::JoinError>) {
        match joined {
            Ok(result) => {
                let mut report = PollCycleReport::default();
                if report.record_result(result).is_none() {
                    debug!(?report, "队列项执行结束");
                }
            }
            Err(e) => {
                error!(error = %e, "队列项执行任务异常退出");
            }
        }
    }
}
