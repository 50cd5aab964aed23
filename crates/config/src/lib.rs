pub mod models;
pub mod validation;

pub use models::{
    AppConfig, DispatcherConfig, LogConfig, LogLevel, OutputFormat, RunnerConfig,
    ScheduleEntryConfig, StorageBackend, StorageConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

/// 配置错误结果
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("配置验证失败: {0}")]
    Validation(String),

    #[error("配置解析失败: {0}")]
    Parse(String),
}

impl From<anyhow::Error> for ConfigError {
    fn from(err: anyhow::Error) -> Self {
        ConfigError::Configuration(err.to_string())
    }
}

impl From<shipqueue_domain::QueueError> for ConfigError {
    fn from(err: shipqueue_domain::QueueError) -> Self {
        ConfigError::Validation(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
