use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use shipqueue_domain::{QueueError, QueueResult, ScheduleConfig, Task, TaskRegistry};

/// 每次触发时构造一个新的任务实例
pub type ScheduledTaskFactory = Arc<dyn Fn() -> QueueResult<Box<dyn Task>> + Send + Sync>;

/// 一条定时计划：任务工厂加日程规则
#[derive(Clone)]
pub struct ScheduleEntry {
    pub name: String,
    pub rule: ScheduleConfig,
    pub queue_name: Option<String>,
    pub context: String,
    /// 触发后延迟多久才进入 queued 状态
    pub delay: Option<Duration>,
    factory: ScheduledTaskFactory,
}

impl ScheduleEntry {
    pub fn new<F>(name: impl Into<String>, rule: ScheduleConfig, factory: F) -> QueueResult<Self>
    where
        F: Fn() -> QueueResult<Box<dyn Task>> + Send + Sync + 'static,
    {
        rule.validate()?;
        Ok(Self {
            name: name.into(),
            rule,
            queue_name: None,
            context: String::new(),
            delay: None,
            factory: Arc::new(factory),
        })
    }

    /// 由注册表和固定载荷构造任务，适用于来自配置文件的计划
    pub fn from_payload(
        name: impl Into<String>,
        rule: ScheduleConfig,
        registry: Arc<TaskRegistry>,
        task_type: impl Into<String>,
        payload: Value,
    ) -> QueueResult<Self> {
        let task_type = task_type.into();
        if !registry.contains(&task_type) {
            return Err(QueueError::unknown_task_type(task_type));
        }
        // 提前验证载荷能够还原
        registry.deserialize(&task_type, &payload)?;

        Self::new(name, rule, move || registry.deserialize(&task_type, &payload))
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build_task(&self) -> QueueResult<Box<dyn Task>> {
        (self.factory)()
    }
}

impl fmt::Debug for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleEntry")
            .field("name", &self.name)
            .field("rule", &self.rule)
            .field("queue_name", &self.queue_name)
            .field("context", &self.context)
            .field("delay", &self.delay)
            .finish()
    }
}
