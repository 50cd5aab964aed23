use serde::{Deserialize, Serialize};
use shipqueue_errors::{QueueError, QueueResult};

/// 进度上限，1个基点 = 0.01%
pub const MAX_PROGRESS_BASE_POINTS: u32 = 10_000;

/// 未显式配置时的最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 未指定队列名称时使用的队列
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// 任务提供给调度器和运行器的执行提示，缺省字段使用全局默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub queue_name: Option<String>,
    pub priority: Option<i32>,
    pub max_attempts: Option<u32>,
    pub retry_policy: Option<RetryPolicy>,
}

impl ExecutionConfig {
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// 退避曲线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

/// 重试退避策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_seconds: 60,
            max_delay_seconds: 3600,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay_seconds: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay_seconds: delay_seconds,
            max_delay_seconds: delay_seconds,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// 第 `retry_count` 次重试前的基础等待秒数（未加抖动）
    ///
    /// `retry_count` 从0开始计。
    pub fn base_delay_secs(&self, retry_count: u32) -> f64 {
        let base = self.base_delay_seconds as f64;
        let raw = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
                base * self.multiplier.powi(exponent)
            }
        };
        raw.min(self.max_delay_seconds as f64)
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.max_delay_seconds < self.base_delay_seconds {
            return Err(QueueError::config_error(
                "最大退避间隔不能小于基础退避间隔",
            ));
        }
        if self.multiplier < 1.0 {
            return Err(QueueError::config_error("退避倍数不能小于1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(QueueError::config_error("抖动系数必须在0到1之间"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.base_delay_seconds, 60);
        assert_eq!(policy.max_delay_seconds, 3600);
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter_factor, 0.1);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_exponential_curve_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay_secs(0), 60.0);
        assert_eq!(policy.base_delay_secs(1), 120.0);
        assert_eq!(policy.base_delay_secs(2), 240.0);
        assert_eq!(policy.base_delay_secs(10), 3600.0);
    }

    #[test]
    fn test_fixed_curve() {
        let policy = RetryPolicy::fixed(30);
        assert_eq!(policy.base_delay_secs(0), 30.0);
        assert_eq!(policy.base_delay_secs(5), 30.0);
    }

    #[test]
    fn test_invalid_policy() {
        let policy = RetryPolicy {
            jitter_factor: 1.5,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            max_delay_seconds: 10,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_execution_config_builder() {
        let config = ExecutionConfig::default()
            .with_queue_name("orders")
            .with_priority(5)
            .with_max_attempts(1);
        assert_eq!(config.queue_name.as_deref(), Some("orders"));
        assert_eq!(config.priority, Some(5));
        assert_eq!(config.max_attempts, Some(1));
        assert!(config.retry_policy.is_none());
    }
}
