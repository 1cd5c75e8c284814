//! 重试退避策略模块

pub mod exponential;

pub use exponential::ExponentialBackoffPolicy;

use std::time::Duration;

/// 退避策略 trait
pub trait BackoffPolicy {
    /// 第 `attempt` 次连续失败后的等待时间（从 0 开始计数）
    fn backoff_duration(&self, attempt: usize) -> Duration;
}
