use super::BackoffPolicy;
use std::time::Duration;

use crate::config::RegistryConfig;

/// 指数退避策略
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.retry_base(), config.retry_max())
    }
}

impl BackoffPolicy for ExponentialBackoffPolicy {
    fn backoff_duration(&self, attempt: usize) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(1 << attempt.min(10));
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy =
            ExponentialBackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(500));
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(3), Duration::from_secs(3));
        assert_eq!(policy.backoff_duration(64), Duration::from_secs(3));
    }

    #[test]
    fn test_huge_base_saturates_at_cap() {
        let policy = ExponentialBackoffPolicy::new(Duration::MAX, Duration::from_secs(20));
        assert_eq!(policy.backoff_duration(0), Duration::from_secs(20));
        assert_eq!(policy.backoff_duration(10), Duration::from_secs(20));

        let policy =
            ExponentialBackoffPolicy::new(Duration::from_millis(u64::MAX / 4), Duration::MAX);
        assert_eq!(policy.backoff_duration(5), Duration::from_millis(u64::MAX));
    }
}
