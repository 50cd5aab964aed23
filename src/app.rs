use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use shipqueue_config::{AppConfig, StorageBackend, StorageConfig};
use shipqueue_core::{EnqueueDefaults, EventBus, QueueService};
use shipqueue_dispatcher::{ScheduleEntry, Scheduler, SchedulerService};
use shipqueue_domain::{NamedTask, QueueStorage, TaskRegistry};
use shipqueue_infrastructure::{InMemoryQueueStorage, SqliteQueueStorage};
use shipqueue_worker::{default_runner_id, RunnerService, TaskRunner, TaskRunnerConfig};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::tasks::{builtin_registry, QueueCleanupTask};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行任务运行器
    Runner,
    /// 仅运行定时调度器
    Scheduler,
    /// 运行所有组件
    All,
}

impl AppMode {
    fn runs_runner(&self) -> bool {
        matches!(self, AppMode::Runner | AppMode::All)
    }

    fn runs_scheduler(&self) -> bool {
        matches!(self, AppMode::Scheduler | AppMode::All)
    }
}

/// 主应用程序
pub struct Application {
    mode: AppMode,
    event_bus: Arc<EventBus>,
    queue_service: Arc<QueueService>,
    runner_service: Option<RunnerService>,
    scheduler_service: Option<SchedulerService>,
}

impl Application {
    /// 使用内置任务类型创建应用
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        Self::with_registry(config, mode, builtin_registry()).await
    }

    /// 使用调用方提供的任务注册表创建应用，内置任务会被补充注册
    pub async fn with_registry(
        config: AppConfig,
        mode: AppMode,
        mut registry: TaskRegistry,
    ) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        if !registry.contains(QueueCleanupTask::TASK_TYPE) {
            registry.register_type::<QueueCleanupTask>();
        }
        let registry = Arc::new(registry);

        let storage = create_storage(&config.storage).await?;
        Self::assemble(config, mode, storage, registry)
    }

    /// 使用已有的存储组装应用
    pub fn assemble(
        config: AppConfig,
        mode: AppMode,
        storage: Arc<dyn QueueStorage>,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new());
        let queue_service = Arc::new(
            QueueService::new(
                Arc::clone(&storage),
                Arc::clone(&event_bus),
                Arc::clone(&registry),
            )
            .with_defaults(EnqueueDefaults {
                queue_name: config.runner.default_queue_name.clone(),
                max_attempts: config.runner.default_max_attempts,
            }),
        );

        let runner_service = if mode.runs_runner() && config.runner.enabled {
            let runner = TaskRunner::new(
                Arc::clone(&storage),
                Arc::clone(&registry),
                Arc::clone(&event_bus),
                runner_config(&config),
            );
            info!(runner_id = %runner.runner_id(), "任务运行器已创建");
            Some(RunnerService::new(
                Arc::new(runner),
                Duration::from_millis(config.runner.poll_interval_ms),
            ))
        } else {
            None
        };

        let scheduler_service = if mode.runs_scheduler() && config.scheduler.enabled {
            let scheduler = build_scheduler(&config, &queue_service, &event_bus, &registry)?;
            Some(SchedulerService::new(
                Arc::new(scheduler),
                Duration::from_secs(config.scheduler.tick_interval_seconds),
            ))
        } else {
            None
        };

        if runner_service.is_none() && scheduler_service.is_none() {
            warn!("当前模式下没有启用任何组件: {:?}", mode);
        }

        Ok(Self {
            mode,
            event_bus,
            queue_service,
            runner_service,
            scheduler_service,
        })
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// 嵌入方用于入队和查询
    pub fn queue_service(&self) -> &Arc<QueueService> {
        &self.queue_service
    }

    /// 运行应用程序直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let runner = async {
            if let Some(service) = &self.runner_service {
                service.run(shutdown_rx.resubscribe()).await;
            }
        };
        let scheduler = async {
            if let Some(service) = &self.scheduler_service {
                service.run(shutdown_rx.resubscribe()).await;
            }
        };
        tokio::join!(runner, scheduler);

        info!("所有组件已停止");
        Ok(())
    }
}

/// 根据配置创建队列存储
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn QueueStorage>> {
    match config.backend {
        StorageBackend::Memory => {
            warn!("使用进程内存储，重启后队列数据会丢失");
            Ok(Arc::new(InMemoryQueueStorage::new()))
        }
        StorageBackend::Sqlite => {
            let storage = SqliteQueueStorage::connect(
                &config.url,
                config.max_connections,
                Duration::from_secs(config.connection_timeout_seconds),
            )
            .await
            .with_context(|| format!("连接SQLite失败: {}", config.url))?;
            info!("SQLite存储已就绪: {}", config.url);
            Ok(Arc::new(storage))
        }
    }
}

fn runner_config(config: &AppConfig) -> TaskRunnerConfig {
    let runner = &config.runner;
    let runner_id = runner.runner_id.clone().unwrap_or_else(default_runner_id);

    TaskRunnerConfig::new(runner_id)
        .with_max_items_per_poll(runner.max_items_per_poll)
        .with_max_concurrent_items(runner.max_concurrent_items)
        .with_heartbeat_interval(Duration::from_secs(runner.heartbeat_interval_seconds))
        // 已由配置校验限制在一天以内
        .with_stuck_timeout(chrono::Duration::seconds(runner.stuck_timeout_seconds as i64))
        .with_execution_timeout(runner.execution_timeout_seconds.map(Duration::from_secs))
        .with_retry_policy(config.retry.clone())
}

fn build_scheduler(
    config: &AppConfig,
    queue_service: &Arc<QueueService>,
    event_bus: &Arc<EventBus>,
    registry: &Arc<TaskRegistry>,
) -> Result<Scheduler> {
    let mut scheduler = Scheduler::new(Arc::clone(queue_service), Arc::clone(event_bus));

    for entry_config in &config.scheduler.schedules {
        let mut entry = ScheduleEntry::from_payload(
            entry_config.name.clone(),
            entry_config.rule.clone(),
            Arc::clone(registry),
            entry_config.task_type.clone(),
            entry_config.payload.clone(),
        )
        .with_context(|| format!("日程 {} 配置无效", entry_config.name))?
        .with_context(entry_config.context.clone());

        if let Some(queue_name) = &entry_config.queue_name {
            entry = entry.with_queue_name(queue_name.clone());
        }
        if let Some(delay) = entry_config.delay_seconds {
            let delay = i64::try_from(delay)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .with_context(|| format!("日程 {} 的延迟过大", entry_config.name))?;
            entry = entry.with_delay(delay);
        }

        scheduler.add_entry(entry).map_err(|e| {
            error!("注册日程失败: {}", e);
            anyhow::Error::from(e)
        })?;
    }

    info!("已注册 {} 个日程", scheduler.entries().len());
    Ok(scheduler)
}
