//! Sample tasks used across the test suites

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shipqueue_domain::{
    to_task_map, ExecutionConfig, NamedTask, QueueResult, RetryPolicy, Task, TaskContext,
    TaskExecutionError, TaskRegistry, MAX_PROGRESS_BASE_POINTS,
};

/// Reports `steps` evenly spaced progress values ending at 10000
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressTask {
    pub steps: u32,
}

impl NamedTask for ProgressTask {
    const TASK_TYPE: &'static str = "ProgressTask";
}

#[async_trait]
impl Task for ProgressTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn to_serializable(&self) -> QueueResult<Value> {
        to_task_map(self)
    }

    async fn execute(&self, ctx: &dyn TaskContext) -> Result<(), TaskExecutionError> {
        let steps = self.steps.max(1);
        for step in 1..=steps {
            ctx.report_progress(MAX_PROGRESS_BASE_POINTS * step / steps)
                .await?;
        }
        Ok(())
    }
}

/// Fails with a retryable error on the first `fail_attempts` attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakyTask {
    pub fail_attempts: u32,
}

impl NamedTask for FlakyTask {
    const TASK_TYPE: &'static str = "FlakyTask";
}

#[async_trait]
impl Task for FlakyTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn to_serializable(&self) -> QueueResult<Value> {
        to_task_map(self)
    }

    fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig::default().with_retry_policy(RetryPolicy::fixed(0))
    }

    async fn execute(&self, ctx: &dyn TaskContext) -> Result<(), TaskExecutionError> {
        if ctx.attempt() <= self.fail_attempts {
            return Err(TaskExecutionError::retryable(format!(
                "temporary failure on attempt {}",
                ctx.attempt()
            )));
        }
        Ok(())
    }
}

/// Always fails, either retryably or fatally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlwaysFailTask {
    pub fatal: bool,
    pub message: String,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl AlwaysFailTask {
    pub fn retryable(message: &str) -> Self {
        Self {
            fatal: false,
            message: message.to_string(),
            max_attempts: None,
        }
    }

    pub fn fatal(message: &str) -> Self {
        Self {
            fatal: true,
            message: message.to_string(),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl NamedTask for AlwaysFailTask {
    const TASK_TYPE: &'static str = "AlwaysFailTask";
}

#[async_trait]
impl Task for AlwaysFailTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn to_serializable(&self) -> QueueResult<Value> {
        to_task_map(self)
    }

    fn execution_config(&self) -> ExecutionConfig {
        let config = ExecutionConfig::default().with_retry_policy(RetryPolicy::fixed(0));
        match self.max_attempts {
            Some(max_attempts) => config.with_max_attempts(max_attempts),
            None => config,
        }
    }

    async fn execute(&self, _ctx: &dyn TaskContext) -> Result<(), TaskExecutionError> {
        if self.fatal {
            Err(TaskExecutionError::fatal(self.message.clone()))
        } else {
            Err(TaskExecutionError::retryable(self.message.clone()))
        }
    }
}

/// Sleeps for `millis` before succeeding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowTask {
    pub millis: u64,
}

impl NamedTask for SlowTask {
    const TASK_TYPE: &'static str = "SlowTask";
}

#[async_trait]
impl Task for SlowTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn to_serializable(&self) -> QueueResult<Value> {
        to_task_map(self)
    }

    async fn execute(&self, _ctx: &dyn TaskContext) -> Result<(), TaskExecutionError> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(())
    }
}

/// Shared counters observed by [`ProbeTask`]
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    active: AtomicUsize,
    max_active: AtomicUsize,
    runs: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Labels in the order executions started
    pub fn order(&self) -> Vec<String> {
        self.order.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

/// Records how many executions overlap
#[derive(Debug, Clone)]
pub struct ProbeTask {
    pub label: String,
    pub millis: u64,
    probe: Arc<ConcurrencyProbe>,
}

impl ProbeTask {
    pub const TASK_TYPE: &'static str = "ProbeTask";

    pub fn new(label: &str, millis: u64, probe: Arc<ConcurrencyProbe>) -> Self {
        Self {
            label: label.to_string(),
            millis,
            probe,
        }
    }

    /// Register a factory that binds every restored task to `probe`
    pub fn register(registry: &mut TaskRegistry, probe: Arc<ConcurrencyProbe>) {
        registry.register(Self::TASK_TYPE, move |payload: &Value| {
            let label = payload["label"].as_str().unwrap_or_default().to_string();
            let millis = payload["millis"].as_u64().unwrap_or_default();
            Ok(Box::new(ProbeTask {
                label,
                millis,
                probe: Arc::clone(&probe),
            }) as Box<dyn Task>)
        });
    }
}

#[async_trait]
impl Task for ProbeTask {
    fn task_type(&self) -> &str {
        Self::TASK_TYPE
    }

    fn to_serializable(&self) -> QueueResult<Value> {
        Ok(json!({ "label": self.label, "millis": self.millis }))
    }

    async fn execute(&self, _ctx: &dyn TaskContext) -> Result<(), TaskExecutionError> {
        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(active, Ordering::SeqCst);
        if let Ok(mut order) = self.probe.order.lock() {
            order.push(self.label.clone());
        }

        tokio::time::sleep(Duration::from_millis(self.millis)).await;

        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        self.probe.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry with every sample task type except [`ProbeTask`]
pub fn sample_registry() -> TaskRegistry {
    TaskRegistry::new()
        .with_type::<ProgressTask>()
        .with_type::<FlakyTask>()
        .with_type::<AlwaysFailTask>()
        .with_type::<SlowTask>()
}
