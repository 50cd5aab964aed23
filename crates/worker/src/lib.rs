//! 任务运行器：认领、执行、重试与超时回收

pub mod backoff;
pub mod context;
pub mod runner;
pub mod service;
pub mod tracker;

pub use backoff::next_retry_delay;
pub use context::{ProgressPersister, RunnerTaskContext};
pub use runner::{ItemOutcome, PollCycleReport, TaskRunner, TaskRunnerConfig};
pub use service::RunnerService;
pub use tracker::ItemTracker;

/// 主机名加随机后缀，保证同一主机上的多个运行器互不相同
pub fn default_runner_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}
