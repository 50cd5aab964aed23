//! 重试退避计算

use chrono::Duration;
use shipqueue_domain::RetryPolicy;

/// 计算第 `retry_count` 次重试前的等待时间（`retry_count` 从0开始）
///
/// 抖动在封顶之后叠加，结果不小于基础间隔。
pub fn next_retry_delay(policy: &RetryPolicy, retry_count: u32) -> Duration {
    let capped = policy.base_delay_secs(retry_count);
    let jitter = capped * policy.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
    let seconds = (capped + jitter).max(policy.base_delay_seconds as f64).max(0.0);

    Duration::milliseconds((seconds * 1000.0).round() as i64)
}
