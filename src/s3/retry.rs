//! Retry executor with exponential backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::errors::{Classify, ErrorClass};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Bounded retry policy. Delay before retry `k` (0-based) is `base_delay * 2^k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Backoff before retry number `retry_index` (0 for the first retry)
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_index);
        self.base_delay.saturating_mul(factor)
    }
}

/// Execute an operation with retry logic and exponential backoff
///
/// Only errors classified [`ErrorClass::Retryable`] are retried. The last error is
/// returned unchanged once the budget is spent. The operation is re-invoked from
/// scratch on every attempt, so it must be safe to repeat.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, operation: &str, mut f: F) -> Result<T, E>
where
    E: Classify + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let class = e.classification();
                if attempt >= policy.max_retries || class != ErrorClass::Retryable {
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying store operation"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
