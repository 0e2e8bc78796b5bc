use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use super::StorageError;
use crate::config::RetryConfig;

/// Cap on a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for idempotent backend calls.
///
/// Only [`StorageError::TransferFailed`] is retried. Everything else, a
/// missing object included, is returned on the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleeps between attempts: `base`, `base^2`, ... milliseconds, capped.
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(base_ms)
            .max_delay(MAX_DELAY)
            .take(self.max_attempts as usize - 1)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut failures = 0u32;
        let max_attempts = self.max_attempts;
        let result = RetryIf::spawn(self.strategy(), call, |e: &StorageError| {
            failures += 1;
            let transient = e.is_transient();
            if transient && failures < max_attempts {
                tracing::warn!(
                    operation,
                    attempt = failures,
                    error = %e,
                    "Backend call failed, retrying"
                );
            }
            transient
        })
        .await;

        if result.is_ok() && failures > 0 {
            tracing::info!(operation, attempts = failures + 1, "Succeeded after retries");
        }
        result
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay)
    }
}
