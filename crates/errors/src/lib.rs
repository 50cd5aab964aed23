use thiserror::Error;

/// 任务执行失败的类型化结果
///
/// `retryable` 为 true 时运行器会在重试预算内安排重试，否则直接标记失败。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskExecutionError {
    pub message: String,
    pub retryable: bool,
}

impl TaskExecutionError {
    /// 可重试的临时性失败（网络、限流等）
    pub fn retryable<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// 不可重试的永久性失败
    pub fn fatal<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("未注册的任务类型: {task_type}")]
    UnknownTaskType { task_type: String },
    #[error("任务执行错误: {0}")]
    TaskExecution(#[from] TaskExecutionError),
    #[error("条件写入冲突: 队列项 {item_id:?} - {reason}")]
    Conflict { item_id: Option<i64>, reason: String },
    #[error("存储不可用: {0}")]
    StorageUnavailable(String),
    #[error("存储操作错误: {0}")]
    Storage(String),
    #[error("队列项未找到: {id}")]
    QueueItemNotFound { id: i64 },
    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("无效的日程配置: {0}")]
    InvalidSchedule(String),
    #[error("无效的进度值: {0}")]
    InvalidProgress(String),
    #[error("事件处理器 {handler} 执行失败: {message}")]
    EventHandler { handler: String, message: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

impl QueueError {
    pub fn unknown_task_type<S: Into<String>>(task_type: S) -> Self {
        Self::UnknownTaskType {
            task_type: task_type.into(),
        }
    }
    pub fn conflict<S: Into<String>>(item_id: Option<i64>, reason: S) -> Self {
        Self::Conflict {
            item_id,
            reason: reason.into(),
        }
    }
    pub fn storage_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StorageUnavailable(msg.into())
    }
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }
    pub fn item_not_found(id: i64) -> Self {
        Self::QueueItemNotFound { id }
    }
    pub fn invalid_transition<F: ToString, T: ToString>(from: F, to: T) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn invalid_schedule<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSchedule(msg.into())
    }
    pub fn event_handler<H: Into<String>, M: Into<String>>(handler: H, message: M) -> Self {
        Self::EventHandler {
            handler: handler.into(),
            message: message.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// CAS前置条件不成立，视为竞争失败而非队列项失败
    pub fn is_conflict(&self) -> bool {
        matches!(self, QueueError::Conflict { .. })
    }

    /// 存储层连接性故障，需中止整个轮询周期
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, QueueError::StorageUnavailable(_))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::TaskExecution(e) => e.retryable,
            QueueError::StorageUnavailable(_) | QueueError::Conflict { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<QueueError> for TaskExecutionError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::TaskExecution(inner) => inner,
            other => TaskExecutionError {
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Internal(err.to_string())
    }
}
