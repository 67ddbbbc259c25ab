//! Saga tuning knobs.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Timeouts and retry policies used by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaConfig {
    /// Upper bound on every call to a collaborating service.
    pub call_timeout: Duration,

    /// Policy for reserve and charge calls. Also paces store write retries.
    pub forward_retry: RetryPolicy,

    /// Policy for release and refund calls.
    pub compensation_retry: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        let min_delay = Duration::from_millis(100);
        let max_delay = Duration::from_secs(2);
        Self {
            call_timeout: Duration::from_secs(5),
            forward_retry: RetryPolicy::new(3, min_delay, max_delay),
            compensation_retry: RetryPolicy::new(5, min_delay, max_delay),
        }
    }
}

impl SagaConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_forward_retry(mut self, policy: RetryPolicy) -> Self {
        self.forward_retry = policy;
        self
    }

    pub fn with_compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SagaConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.forward_retry.max_attempts(), 3);
        assert_eq!(config.compensation_retry.max_attempts(), 5);
    }

    #[test]
    fn test_builder() {
        let fast = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1));
        let config = SagaConfig::default()
            .with_call_timeout(Duration::from_millis(50))
            .with_forward_retry(fast)
            .with_compensation_retry(fast);
        assert_eq!(config.call_timeout, Duration::from_millis(50));
        assert_eq!(config.forward_retry, fast);
        assert_eq!(config.compensation_retry.max_attempts(), 2);
    }
}
