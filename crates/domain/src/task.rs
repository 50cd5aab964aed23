//! 任务契约与任务类型注册表

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shipqueue_errors::{QueueError, QueueResult, TaskExecutionError};

use crate::entities::utc_now;
use crate::repositories::QueueStorage;
use crate::value_objects::{ExecutionConfig, MAX_PROGRESS_BASE_POINTS};

/// 一个可序列化的业务工作单元
#[async_trait]
pub trait Task: Send + Sync + fmt::Debug {
    /// 注册表中的类型标识
    fn task_type(&self) -> &str;

    /// 序列化为键值映射，注册表必须能由它重建出等价的任务
    fn to_serializable(&self) -> QueueResult<Value>;

    fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig::default()
    }

    async fn execute(&self, ctx: &dyn TaskContext) -> Result<(), TaskExecutionError>;
}

/// 具有固定类型标识的任务，配合 [`TaskRegistry::register_type`] 使用
pub trait NamedTask {
    const TASK_TYPE: &'static str;
}

/// 用serde把任务序列化为对象
pub fn to_task_map<T: Serialize>(task: &T) -> QueueResult<Value> {
    let value = serde_json::to_value(task)?;
    if !value.is_object() {
        return Err(QueueError::Serialization(
            "任务必须序列化为键值映射".to_string(),
        ));
    }
    Ok(value)
}

/// 任务执行期间可用的运行时上下文
#[async_trait]
pub trait TaskContext: Send + Sync {
    fn item_id(&self) -> i64;

    fn queue_name(&self) -> &str;

    /// 执行上下文（系统/租户标识）
    fn context(&self) -> &str;

    /// 当前是第几次尝试，从1开始
    fn attempt(&self) -> u32;

    /// 上报进度基点，必须单调不减且不超过10000
    async fn report_progress(&self, base_points: u32) -> QueueResult<()>;

    async fn report_progress_percent(&self, percent: f64) -> QueueResult<()> {
        let clamped = percent.clamp(0.0, 100.0);
        let base_points = (clamped * 100.0).round() as u32;
        self.report_progress(base_points.min(MAX_PROGRESS_BASE_POINTS))
            .await
    }

    /// 主动刷新心跳
    async fn report_alive(&self) -> QueueResult<()>;

    /// 协作式取消检查
    async fn is_canceled(&self) -> QueueResult<bool>;

    fn storage(&self) -> Arc<dyn QueueStorage>;

    fn now(&self) -> DateTime<Utc> {
        utc_now()
    }
}

pub type TaskFactory = Arc<dyn Fn(&Value) -> QueueResult<Box<dyn Task>> + Send + Sync>;

/// 任务类型注册表：类型标识 -> 构造函数
///
/// 在运行器和调度器构造前填充，之后只读共享。
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, task_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> QueueResult<Box<dyn Task>> + Send + Sync + 'static,
    {
        self.factories.insert(task_type.into(), Arc::new(factory));
        self
    }

    /// 注册可由serde反序列化的任务类型
    pub fn register_type<T>(&mut self) -> &mut Self
    where
        T: Task + NamedTask + DeserializeOwned + 'static,
    {
        self.register(T::TASK_TYPE, |payload: &Value| {
            let task: T = serde_json::from_value(payload.clone())?;
            Ok(Box::new(task) as Box<dyn Task>)
        })
    }

    pub fn with_type<T>(mut self) -> Self
    where
        T: Task + NamedTask + DeserializeOwned + 'static,
    {
        self.register_type::<T>();
        self
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// 由类型标识和键值映射重建任务
    pub fn deserialize(&self, task_type: &str, payload: &Value) -> QueueResult<Box<dyn Task>> {
        let factory = self
            .factories
            .get(task_type)
            .ok_or_else(|| QueueError::unknown_task_type(task_type))?;
        factory(payload)
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
