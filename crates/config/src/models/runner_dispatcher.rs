use serde::{Deserialize, Serialize};
use shipqueue_domain::{ScheduleConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_NAME};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigError;

/// 任务运行器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    pub enabled: bool,
    /// 为空时按主机名生成
    pub runner_id: Option<String>,
    pub poll_interval_ms: u64,
    pub max_items_per_poll: usize,
    pub max_concurrent_items: usize,
    pub heartbeat_interval_seconds: u64,
    /// 超过该时长没有心跳的 running 队列项会被回收
    pub stuck_timeout_seconds: u64,
    pub execution_timeout_seconds: Option<u64>,
    pub default_queue_name: String,
    pub default_max_attempts: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runner_id: None,
            poll_interval_ms: 1000,
            max_items_per_poll: 10,
            max_concurrent_items: 10,
            heartbeat_interval_seconds: 30,
            stuck_timeout_seconds: 300,
            execution_timeout_seconds: None,
            default_queue_name: DEFAULT_QUEUE_NAME.to_string(),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ConfigValidator for RunnerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if let Some(runner_id) = &self.runner_id {
            ValidationUtils::validate_not_empty(runner_id, "runner.runner_id")?;
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "runner.poll_interval_ms 必须大于0".to_string(),
            ));
        }
        ValidationUtils::validate_count(self.max_items_per_poll, "runner.max_items_per_poll", 1000)?;
        ValidationUtils::validate_count(
            self.max_concurrent_items,
            "runner.max_concurrent_items",
            1000,
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_interval_seconds,
            "runner.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.stuck_timeout_seconds,
            "runner.stuck_timeout_seconds",
        )?;
        if self.heartbeat_interval_seconds >= self.stuck_timeout_seconds {
            return Err(ConfigError::Validation(
                "runner.heartbeat_interval_seconds 必须小于 runner.stuck_timeout_seconds"
                    .to_string(),
            ));
        }
        if let Some(timeout) = self.execution_timeout_seconds {
            ValidationUtils::validate_timeout_seconds(timeout, "runner.execution_timeout_seconds")?;
        }
        ValidationUtils::validate_not_empty(&self.default_queue_name, "runner.default_queue_name")?;
        if self.default_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "runner.default_max_attempts 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// 配置文件中声明的周期任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntryConfig {
    pub name: String,
    pub task_type: String,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub queue_name: Option<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub delay_seconds: Option<u64>,
    pub rule: ScheduleConfig,
}

impl ConfigValidator for ScheduleEntryConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.name, "scheduler.schedules.name")?;
        ValidationUtils::validate_not_empty(&self.task_type, "scheduler.schedules.task_type")?;
        if !self.payload.is_object() {
            return Err(ConfigError::Validation(format!(
                "日程 {} 的 payload 必须是键值映射",
                self.name
            )));
        }
        self.rule.validate()?;
        Ok(())
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub tick_interval_seconds: u64,
    pub schedules: Vec<ScheduleEntryConfig>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: 30,
            schedules: Vec::new(),
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.tick_interval_seconds,
            "scheduler.tick_interval_seconds",
        )?;
        if self.tick_interval_seconds > 60 {
            return Err(ConfigError::Validation(
                "scheduler.tick_interval_seconds 不能超过60秒，否则会错过分钟级触发".to_string(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for entry in &self.schedules {
            entry.validate()?;
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "日程名称重复: {}",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}
