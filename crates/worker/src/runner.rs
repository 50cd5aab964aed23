//! 任务运行器
//!
//! 每个轮询周期依次：把到期的 scheduled/retrying 队列项推进为 queued，
//! 回收心跳超时的 running 队列项，按队列认领最早的 queued 队列项并执行。
//! 同一队列的互斥完全依赖存储查询约定加条件写入，运行器不持有跨周期的锁。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use shipqueue_core::{CommittedTransition, EventBus, StatusTransitioner};
use shipqueue_domain::{
    truncate_to_micros, utc_now, EventKind, QueueItem, QueueItemFilter, QueueItemStatus,
    QueueStorage, RetryPolicy, Task, TaskContext, TaskRegistry, MAX_PROGRESS_BASE_POINTS,
};
use shipqueue_errors::{QueueError, QueueResult, TaskExecutionError};
use shipqueue_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::next_retry_delay;
use crate::context::{ProgressPersister, RunnerTaskContext};
use crate::tracker::ItemTracker;

/// 运行器配置
#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    pub runner_id: String,
    /// 每个周期最多认领的队列项数
    pub max_items_per_poll: usize,
    /// 同时执行的队列项上限
    pub max_concurrent_items: usize,
    pub heartbeat_interval: Duration,
    /// 心跳超过该时长未刷新的 running 队列项会被回收
    pub stuck_timeout: chrono::Duration,
    pub execution_timeout: Option<Duration>,
    /// 任务未声明重试策略时使用
    pub retry_policy: RetryPolicy,
}

impl TaskRunnerConfig {
    pub fn new(runner_id: impl Into<String>) -> Self {
        Self {
            runner_id: runner_id.into(),
            max_items_per_poll: 10,
            max_concurrent_items: 10,
            heartbeat_interval: Duration::from_secs(30),
            stuck_timeout: chrono::Duration::seconds(300),
            execution_timeout: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_max_items_per_poll(mut self, max_items: usize) -> Self {
        self.max_items_per_poll = max_items.max(1);
        self
    }

    pub fn with_max_concurrent_items(mut self, max_items: usize) -> Self {
        self.max_concurrent_items = max_items.max(1);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_stuck_timeout(mut self, timeout: chrono::Duration) -> Self {
        self.stuck_timeout = timeout;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self::new(crate::default_runner_id())
    }
}

/// 单个队列项执行后的结局
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Completed(QueueItem),
    Retrying(QueueItem),
    Failed(QueueItem),
    /// 结束前状态已被其他参与者改变（取消、回收）
    LostRace,
    /// 结束状态的转换被否决且无法标记失败，留给超时回收
    Abandoned,
}

/// 一个轮询周期的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollCycleReport {
    pub promoted: usize,
    pub reclaimed: usize,
    pub claimed: usize,
    pub conflicts: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub lost: usize,
    pub abandoned: usize,
    /// 执行过程中存储不可用以外的错误
    pub errors: usize,
}

impl PollCycleReport {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Completed(_) => self.completed += 1,
            ItemOutcome::Retrying(_) => self.retried += 1,
            ItemOutcome::Failed(_) => self.failed += 1,
            ItemOutcome::LostRace => self.lost += 1,
            ItemOutcome::Abandoned => self.abandoned += 1,
        }
    }

    /// 计入一个队列项的执行结果，存储不可用的错误交还给调用方
    pub fn record_result(&mut self, result: QueueResult<ItemOutcome>) -> Option<QueueError> {
        match result {
            Ok(outcome) => self.record(&outcome),
            Err(e) if e.is_storage_unavailable() => {
                error!(error = %e, "执行期间存储不可用");
                return Some(e);
            }
            Err(e) => {
                error!(error = %e, "队列项执行过程出错");
                self.errors += 1;
            }
        }
        None
    }
}

pub struct TaskRunner {
    storage: Arc<dyn QueueStorage>,
    registry: Arc<TaskRegistry>,
    event_bus: Arc<EventBus>,
    transitioner: StatusTransitioner,
    config: TaskRunnerConfig,
    metrics: MetricsCollector,
}

impl TaskRunner {
    pub fn new(
        storage: Arc<dyn QueueStorage>,
        registry: Arc<TaskRegistry>,
        event_bus: Arc<EventBus>,
        config: TaskRunnerConfig,
    ) -> Self {
        Self {
            transitioner: StatusTransitioner::new(Arc::clone(&storage), Arc::clone(&event_bus)),
            storage,
            registry,
            event_bus,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn runner_id(&self) -> &str {
        &self.config.runner_id
    }

    pub fn config(&self) -> &TaskRunnerConfig {
        &self.config
    }

    /// 执行一个完整的轮询周期并等待本轮认领的队列项全部结束
    ///
    /// 存储不可用时中止并返回错误；单个队列项的错误不影响同批其他队列项。
    #[instrument(skip(self), fields(runner.id = %self.config.runner_id))]
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> QueueResult<PollCycleReport> {
        let (mut report, claimed) = self
            .prepare_cycle(now, self.config.max_items_per_poll)
            .await?;

        self.metrics.set_in_flight(claimed.len());
        let results: Vec<QueueResult<ItemOutcome>> = stream::iter(claimed)
            .map(|item| self.execute_claimed(item))
            .buffer_unordered(self.config.max_concurrent_items.max(1))
            .collect()
            .await;
        self.metrics.set_in_flight(0);

        let mut storage_error = None;
        for result in results {
            if let Some(e) = report.record_result(result) {
                storage_error.get_or_insert(e);
            }
        }

        match storage_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// 推进到期项、回收超时项，再认领至多 `capacity` 个队列项，不执行
    ///
    /// 返回的队列项已处于 running，由调用方负责交给 [`TaskRunner::execute_claimed`]。
    pub async fn prepare_cycle(
        &self,
        now: DateTime<Utc>,
        capacity: usize,
    ) -> QueueResult<(PollCycleReport, Vec<QueueItem>)> {
        let started = Instant::now();
        let mut report = PollCycleReport {
            promoted: self.promote_due_items(now).await?,
            reclaimed: self.reclaim_stuck_items(now).await?,
            ..PollCycleReport::default()
        };

        let (claimed, conflicts) = if capacity == 0 {
            (Vec::new(), 0)
        } else {
            self.claim_up_to(now, capacity).await?
        };
        report.claimed = claimed.len();
        report.conflicts = conflicts;

        self.metrics
            .record_poll_cycle(started.elapsed().as_secs_f64());
        StructuredLogger::log_poll_cycle(
            &self.config.runner_id,
            report.promoted,
            report.reclaimed,
            report.claimed,
        );

        Ok((report, claimed))
    }

    pub(crate) fn set_in_flight(&self, count: usize) {
        self.metrics.set_in_flight(count);
    }

    /// 把 `scheduled_at <= now` 的 scheduled 与 retrying 队列项推进为 queued
    pub async fn promote_due_items(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let due = self
            .storage
            .find(
                &QueueItemFilter::new()
                    .with_statuses(&[QueueItemStatus::Scheduled, QueueItemStatus::Retrying])
                    .scheduled_before(now),
            )
            .await?;

        let mut promoted = 0;
        for item in due {
            let next = item.transitioned(QueueItemStatus::Queued, now)?;
            match self.commit(&item, next).await {
                Ok(_) => promoted += 1,
                Err(e) if e.is_storage_unavailable() => return Err(e),
                Err(e) if e.is_conflict() => {
                    debug!(queue_item.id = ?item.id, "推进到期队列项时发生竞争，跳过");
                }
                Err(e) => {
                    warn!(queue_item.id = ?item.id, error = %e, "推进到期队列项失败");
                }
            }
        }

        Ok(promoted)
    }

    /// 回收心跳超时的 running 队列项
    ///
    /// 条件写入同时校验状态和心跳时间，仍在刷新心跳的执行者不会被抢占。
    /// 还有重试预算时回到 queued 并计一次重试，否则标记失败。
    pub async fn reclaim_stuck_items(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let threshold = now - self.config.stuck_timeout;
        let stuck = self
            .storage
            .find(
                &QueueItemFilter::new()
                    .with_status(QueueItemStatus::Running)
                    .last_update_before(threshold),
            )
            .await?;

        let mut reclaimed = 0;
        for item in stuck {
            let next = if item.has_retry_budget() {
                let mut next = item.transitioned(QueueItemStatus::Queued, now)?;
                next.retries += 1;
                next
            } else {
                let mut next = item.transitioned(QueueItemStatus::Failed, now)?;
                next.failure_description = Some(format!(
                    "执行心跳超时，最后心跳时间 {}",
                    item.last_update_at
                ));
                next
            };

            match self.commit(&item, next).await {
                Ok(committed) => {
                    reclaimed += 1;
                    StructuredLogger::log_item_reclaimed(&committed.item, item.last_update_at);
                }
                Err(e) if e.is_storage_unavailable() => return Err(e),
                Err(e) if e.is_conflict() => {
                    debug!(queue_item.id = ?item.id, "回收时心跳已刷新或已被其他运行器处理");
                }
                Err(e) => {
                    warn!(queue_item.id = ?item.id, error = %e, "回收超时队列项失败");
                }
            }
        }

        if reclaimed > 0 {
            self.metrics.record_reclaimed(reclaimed as u64);
        }
        Ok(reclaimed)
    }

    /// 认领每个空闲队列中最早的 queued 队列项
    ///
    /// 返回认领成功的队列项与竞争失败的次数。
    pub async fn poll_once(&self, now: DateTime<Utc>) -> QueueResult<(Vec<QueueItem>, usize)> {
        self.claim_up_to(now, self.config.max_items_per_poll).await
    }

    async fn claim_up_to(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> QueueResult<(Vec<QueueItem>, usize)> {
        let candidates = self.storage.find_oldest_queued_per_queue(limit).await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        let mut conflicts = 0;
        for item in candidates {
            let mut next = item.transitioned(QueueItemStatus::Running, now)?;
            next.runner_id = Some(self.config.runner_id.clone());

            match self.commit(&item, next).await {
                Ok(committed) => {
                    self.metrics.record_claimed();
                    StructuredLogger::log_item_claimed(&committed.item, &self.config.runner_id);
                    claimed.push(committed.item);
                }
                Err(e) if e.is_storage_unavailable() => return Err(e),
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    self.metrics.record_claim_conflict();
                    debug!(queue_item.id = ?item.id, "认领竞争失败，留给下一轮");
                }
                Err(e) => {
                    warn!(queue_item.id = ?item.id, error = %e, "认领队列项被拒绝");
                }
            }
        }

        Ok((claimed, conflicts))
    }

    /// 执行一个已认领（running）的队列项并写入结束状态
    #[instrument(skip(self, item), fields(queue_item.id = ?item.id, task.type = %item.task_type))]
    pub async fn execute_claimed(&self, item: QueueItem) -> QueueResult<ItemOutcome> {
        let started = Instant::now();
        let item_id = item.require_id()?;
        let tracker = Arc::new(ItemTracker::new(Arc::clone(&self.storage), item.clone()));

        let task = match self.registry.deserialize(&item.task_type, &item.serialized_task) {
            Ok(task) => task,
            Err(e) => {
                error!(queue_item.id = item_id, error = %e, "无法还原任务");
                return self
                    .finish(&tracker, Err(TaskExecutionError::fatal(e.to_string())), started)
                    .await;
            }
        };

        let retry_policy = task
            .execution_config()
            .retry_policy
            .unwrap_or_else(|| self.config.retry_policy.clone());

        let ctx = RunnerTaskContext::new(
            &item,
            Arc::clone(&tracker),
            Arc::clone(&self.event_bus),
            Arc::clone(&self.storage),
            self.config.runner_id.clone(),
        )?;
        let subscription = self
            .event_bus
            .subscribe(
                EventKind::Progress,
                Arc::new(ProgressPersister::new(item_id, Arc::clone(&tracker))),
            )
            .await;

        let mut result = self.run_with_heartbeat(task.as_ref(), &ctx).await;
        if result.is_ok() && ctx.last_progress() < MAX_PROGRESS_BASE_POINTS {
            if let Err(e) = ctx.report_progress(MAX_PROGRESS_BASE_POINTS).await {
                result = Err(TaskExecutionError::fatal(format!("最终进度上报失败: {e}")));
            }
        }

        self.event_bus.unsubscribe(subscription).await;

        self.finish_with_policy(&tracker, result, &retry_policy, started)
            .await
    }

    async fn run_with_heartbeat(
        &self,
        task: &dyn Task,
        ctx: &RunnerTaskContext,
    ) -> Result<(), TaskExecutionError> {
        let execution = async {
            match self.config.execution_timeout {
                Some(limit) => tokio::time::timeout(limit, task.execute(ctx))
                    .await
                    .unwrap_or_else(|_| {
                        Err(TaskExecutionError::retryable(format!(
                            "执行超时（{} 秒）",
                            limit.as_secs_f64()
                        )))
                    }),
                None => task.execute(ctx).await,
            }
        };
        tokio::pin!(execution);

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        // 第一次 tick 立即完成
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut execution => return result,
                _ = heartbeat.tick() => {
                    if let Err(e) = ctx.heartbeat().await {
                        warn!(queue_item.id = ctx.item_id(), error = %e, "心跳写入失败");
                    }
                }
            }
        }
    }

    async fn finish(
        &self,
        tracker: &ItemTracker,
        result: Result<(), TaskExecutionError>,
        started: Instant,
    ) -> QueueResult<ItemOutcome> {
        let policy = self.config.retry_policy.clone();
        self.finish_with_policy(tracker, result, &policy, started)
            .await
    }

    async fn finish_with_policy(
        &self,
        tracker: &ItemTracker,
        result: Result<(), TaskExecutionError>,
        retry_policy: &RetryPolicy,
        started: Instant,
    ) -> QueueResult<ItemOutcome> {
        let current = tracker.snapshot().await;
        let now = utc_now();

        let next = match &result {
            Ok(()) => current.transitioned(QueueItemStatus::Completed, now)?,
            Err(e) if e.retryable && current.has_retry_budget() => {
                let mut next = current.transitioned(QueueItemStatus::Retrying, now)?;
                next.scheduled_at =
                    truncate_to_micros(now + next_retry_delay(retry_policy, current.retries));
                next.failure_description = Some(e.message.clone());
                next
            }
            Err(e) => {
                let mut next = current.transitioned(QueueItemStatus::Failed, now)?;
                next.failure_description = Some(e.message.clone());
                next
            }
        };

        let outcome = match self.commit(&current, next).await {
            Ok(committed) => self.outcome_of(committed.item, &result),
            Err(e) if e.is_conflict() => {
                info!(queue_item.id = ?current.id, "结束前队列项状态已改变，放弃写入");
                ItemOutcome::LostRace
            }
            Err(e @ QueueError::EventHandler { .. }) => {
                self.fail_after_veto(&current, &e).await?
            }
            Err(e) => return Err(e),
        };

        let duration = started.elapsed();
        if let ItemOutcome::Completed(item) | ItemOutcome::Retrying(item) | ItemOutcome::Failed(item) =
            &outcome
        {
            self.metrics
                .record_execution(&item.task_type, item.status, duration.as_secs_f64());
            StructuredLogger::log_status_transition(
                item,
                current.status,
                Some(duration.as_millis() as u64),
            );
            if let (ItemOutcome::Retrying(item), Err(e)) = (&outcome, &result) {
                StructuredLogger::log_retry_scheduled(item, &e.message);
            }
        }

        Ok(outcome)
    }

    fn outcome_of(&self, item: QueueItem, result: &Result<(), TaskExecutionError>) -> ItemOutcome {
        match (item.status, result) {
            (QueueItemStatus::Completed, _) => ItemOutcome::Completed(item),
            (QueueItemStatus::Retrying, _) => ItemOutcome::Retrying(item),
            _ => ItemOutcome::Failed(item),
        }
    }

    /// 结束状态被事件处理器否决时按不可重试错误处理
    async fn fail_after_veto(
        &self,
        current: &QueueItem,
        veto: &QueueError,
    ) -> QueueResult<ItemOutcome> {
        warn!(queue_item.id = ?current.id, error = %veto, "结束状态转换被否决，标记为失败");

        let mut next = current.transitioned(QueueItemStatus::Failed, utc_now())?;
        next.failure_description = Some(veto.to_string());

        match self.commit(current, next).await {
            Ok(committed) => Ok(ItemOutcome::Failed(committed.item)),
            Err(e) if e.is_conflict() => Ok(ItemOutcome::LostRace),
            Err(e) if e.is_storage_unavailable() => Err(e),
            Err(e) => {
                error!(queue_item.id = ?current.id, error = %e, "失败状态同样被否决，等待超时回收");
                Ok(ItemOutcome::Abandoned)
            }
        }
    }

    async fn commit(&self, current: &QueueItem, next: QueueItem) -> QueueResult<CommittedTransition> {
        let committed = self.transitioner.commit(current, next).await?;
        if let Some(e) = &committed.notification_error {
            self.metrics.record_notification_failure();
            error!(
                queue_item.id = ?committed.item.id,
                status = %committed.item.status,
                error = %e,
                "状态已提交，但变更通知处理失败"
            );
        }
        Ok(committed)
    }
}
