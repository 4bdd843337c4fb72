//! Bounded exponential backoff for transient store errors.
//!
//! Bulk task start/end from concurrent array workers occasionally hits a
//! locked database even with WAL; the retry policy absorbs those without
//! letting a wedged store hang a task forever.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::domain::error::StoreError;
use crate::domain::models::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// Run `operation`, retrying transient failures with exponential
    /// backoff until the attempt budget is spent.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let backoff = self
                        .initial_backoff_ms
                        .saturating_mul(1u64 << attempt.min(16))
                        .min(self.max_backoff_ms);
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        backoff_ms = backoff,
                        error = %err,
                        "store operation failed, retrying"
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Locked("busy".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::SchemaMissing)
            })
            .await;
        assert!(matches!(result.unwrap_err(), StoreError::SchemaMissing));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_error() {
        let result: Result<(), _> = fast_policy()
            .execute(|| async { Err(StoreError::Locked("busy".into())) })
            .await;
        assert!(matches!(result.unwrap_err(), StoreError::Locked(_)));
    }
}
