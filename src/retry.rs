use std::time::Duration;

use crate::core::CoreError;

/// Bounded retry for transient storage failures: linear backoff
/// (`base_delay × attempt`), business outcomes never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Run `op`, retrying only errors tagged retryable by the storage layer.
/// Non-retryable errors (not-found, conflict, version mismatch, validation)
/// propagate on first occurrence.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                metrics::counter!(crate::observability::RETRY_ATTEMPTS_TOTAL).increment(1);
                tracing::warn!("operation failed, retrying ({attempt}/{attempts}): {e}");
                tokio::time::sleep(policy.base_delay * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("with_retry: final attempt returns above")
}
