//! Bounded retries with exponential backoff for single store calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::contract::Sleeper;
use crate::error::StoreError;

/// Retry parameters for one remote call.
///
/// The delay before retry `k` (the first retry is `k = 1`) is
/// `base_delay * backoff_factor^(k - 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
            backoff_factor: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up. The last error is returned as the store produced it.
    pub async fn run<T, F, Fut, Z>(
        &self,
        operation: &str,
        sleeper: &Z,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        Z: Sleeper + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "[RETRY] Call succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_before_retry(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "[RETRY] Transient failure, backing off"
                    );
                    sleeper.sleep(delay).await;
                }
                Err(e) => {
                    error!(operation, attempt, error = %e, "[RETRY] Giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn delays_grow_by_backoff_factor() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before_retry(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_before_retry(2), Duration::from_millis(3000));
        assert_eq!(policy.delay_before_retry(3), Duration::from_millis(4500));
    }

    #[test]
    fn huge_retry_index_saturates_instead_of_panicking() {
        let policy = RetryPolicy {
            max_attempts: 80,
            base_delay: Duration::from_millis(2000),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_before_retry(79), Duration::MAX);
        assert_eq!(policy.delay_before_retry(u32::MAX), Duration::MAX);
    }

    #[tokio::test]
    async fn succeeds_on_last_attempt_after_sleeping_between_failures() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = policy
            .run("create_batch", &sleeper, move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(StoreError::transient(format!("timeout {n}")))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![Duration::from_millis(2000), Duration::from_millis(3000)]
        );
    }

    #[tokio::test]
    async fn exhausting_attempts_returns_the_last_error_unchanged() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = policy
            .run("commit_batch", &sleeper, move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(StoreError::transient(format!("boom {n}")))
            })
            .await;

        assert_eq!(result, Err(StoreError::transient("boom 3")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = policy
            .run("create_asset", &sleeper, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::capacity("out of cycles"))
            })
            .await;

        assert_eq!(result, Err(StoreError::capacity("out of cycles")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let sleeper = RecordingSleeper::default();
        let result = policy
            .run("list", &sleeper, || async { Ok::<_, StoreError>("ok") })
            .await;
        assert_eq!(result, Ok("ok"));
    }
}
