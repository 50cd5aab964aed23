use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use shipqueue_domain::RetryPolicy;
use std::path::Path;

use super::{
    logging::LogConfig,
    runner_dispatcher::{DispatcherConfig, RunnerConfig},
    storage::StorageConfig,
};
use crate::validation::ConfigValidator;

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub runner: RunnerConfig,
    pub retry: RetryPolicy,
    pub scheduler: DispatcherConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 结构体默认值
    /// 2. 配置文件（TOML）
    /// 3. 环境变量覆盖（前缀 `SHIPQUEUE_`，层级分隔符 `__`，
    ///    例如 `SHIPQUEUE_RUNNER__POLL_INTERVAL_MS`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/shipqueue.toml", "shipqueue.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SHIPQUEUE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 校验配置有效性
    pub fn validate(&self) -> Result<()> {
        self.storage.validate().context("存储配置验证失败")?;

        self.runner.validate().context("运行器配置验证失败")?;

        self.retry.validate().context("重试策略验证失败")?;

        self.scheduler.validate().context("调度器配置验证失败")?;

        self.logging.validate().context("日志配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutputFormat, StorageBackend};
    use shipqueue_domain::{BackoffStrategy, RecurrenceKind};
    use std::io::Write;

    const SAMPLE: &str = r#"
[storage]
backend = "memory"

[runner]
runner_id = "runner-a"
max_items_per_poll = 4
stuck_timeout_seconds = 120
heartbeat_interval_seconds = 10

[retry]
strategy = "fixed"
base_delay_seconds = 15
max_delay_seconds = 15

[logging]
format = "json"

[[scheduler.schedules]]
name = "nightly-cleanup"
task_type = "QueueCleanupTask"
payload = { retention_days = 14 }

[scheduler.schedules.rule]
kind = "daily"
hour = 3
minute = 0
"#;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.runner.runner_id.as_deref(), Some("runner-a"));
        assert_eq!(config.runner.max_items_per_poll, 4);
        assert_eq!(config.runner.poll_interval_ms, 1000);
        assert_eq!(config.retry.strategy, BackoffStrategy::Fixed);
        assert_eq!(config.logging.format, OutputFormat::Json);

        let entry = &config.scheduler.schedules[0];
        assert_eq!(entry.rule.kind, RecurrenceKind::Daily);
        assert_eq!(entry.rule.hour, 3);
        assert_eq!(entry.payload["retention_days"], 14);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        let reparsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = AppConfig::from_toml(
            r#"
[runner]
heartbeat_interval_seconds = 600
stuck_timeout_seconds = 300
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let path = file.path().to_str().unwrap();
        let config = AppConfig::load(Some(path)).unwrap();
        assert_eq!(config.runner.stuck_timeout_seconds, 120);
        assert_eq!(config.scheduler.schedules.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load(Some("/nonexistent/shipqueue.toml")).is_err());
    }
}
