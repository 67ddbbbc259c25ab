//! Retry policies: bounded backoff for remote calls and unbounded backoff
//! for store writes that record effects which already happened.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder, Retryable};
use order_store::OrderStoreError;

/// Bounded exponential backoff for one kind of remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    min_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` calls in total (at least one).
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delays to sleep between attempts.
    ///
    /// Yields `max_attempts - 1` delays; running out means the attempts are
    /// exhausted.
    pub fn delays(&self) -> ExponentialBackoff {
        self.builder()
            .with_max_times(self.max_attempts as usize - 1)
            .build()
    }

    /// Returns a backoff that never gives up, capped at the max delay.
    pub fn unbounded(&self) -> ExponentialBuilder {
        self.builder().with_max_times(usize::MAX)
    }

    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_jitter()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(2))
    }
}

/// Runs a store write until it stops failing with `Unavailable`.
///
/// Any other store error is returned as is.
pub async fn persist<T, F, Fut>(
    policy: &RetryPolicy,
    what: &'static str,
    write: F,
) -> Result<T, OrderStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrderStoreError>>,
{
    write
        .retry(policy.unbounded())
        .when(OrderStoreError::is_retryable)
        .notify(|err, delay| {
            tracing::warn!(error = %err, ?delay, what, "order store write failed, retrying");
            metrics::counter!("order_store_retries_total", "write" => what).increment(1);
        })
        .await
}
