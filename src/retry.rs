use crate::cancel::sleep_with_cancel;
use crate::{ResolverError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub base_delay: Duration,
    /// Maximum delay cap, applied before jitter
    pub max_delay: Duration,
    /// Add up to 50% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_delay);

        if !self.jitter {
            return backoff;
        }
        let spread = (backoff.as_millis() / 2) as u64;
        if spread == 0 {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0..=spread);
        backoff + Duration::from_millis(jitter)
    }
}

/// Result of a retry operation with context
#[derive(Debug)]
pub struct RetryResult<T> {
    /// The successful result
    pub result: T,
    /// Number of attempts made, including the successful one
    pub attempts_made: u32,
    /// Total time spent sleeping between attempts
    pub total_retry_time: Duration,
}

/// Execute an async operation with exponential backoff.
///
/// Retryable failures (timeouts, transport errors, bad statuses) are retried
/// until `max_attempts` attempts have been made; the last failure is then
/// returned. Other errors are returned immediately.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name of the operation for logging
/// * `cancel` - Optional cancellation receiver; cancels backoff sleeps
/// * `operation` - Async function that returns a Result
/// * `on_retry` - Callback invoked before each backoff `(attempt, delay, error)`
pub async fn retry_with_backoff<T, F, Fut, OnRetry>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: Option<watch::Receiver<bool>>,
    mut operation: F,
    mut on_retry: OnRetry,
) -> Result<RetryResult<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    OnRetry: FnMut(u32, Duration, &ResolverError),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut total_retry_time = Duration::ZERO;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                return Ok(RetryResult {
                    result,
                    attempts_made: attempt,
                    total_retry_time,
                });
            }
            Err(err) if err.is_retryable() => {
                if attempt >= max_attempts {
                    log::warn!(
                        "Max attempts ({max_attempts}) exhausted for {operation_name}: {err}"
                    );
                    return Err(err);
                }

                let delay = config.delay_for(attempt);
                log::info!(
                    "{operation_name} failed ({err}). Waiting {}ms before attempt {} of {max_attempts}",
                    delay.as_millis(),
                    attempt + 1,
                );
                on_retry(attempt, delay, &err);

                match &cancel {
                    Some(rx) => sleep_with_cancel(rx.clone(), delay).await?,
                    None => tokio::time::sleep(delay).await,
                }
                total_retry_time += delay;
            }
            Err(other_error) => {
                return Err(other_error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn retry_quietly<T, F, Fut>(
        config: &RetryConfig,
        operation_name: &str,
        operation: F,
    ) -> Result<RetryResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_backoff(config, operation_name, None, operation, |_, _, _| {}).await
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter: true,
        }
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let result = retry_quietly(&fast_config(3), "test", || async {
            Ok::<i32, ResolverError>(42)
        })
        .await;

        let retry_result = result.unwrap();
        assert_eq!(retry_result.result, 42);
        assert_eq!(retry_result.attempts_made, 1);
        assert_eq!(retry_result.total_retry_time, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retry_on_transport_error() {
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        let result = retry_quietly(&fast_config(3), "test", move || {
            let count = call_count_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(ResolverError::Transport("connection reset".to_string()))
                } else {
                    Ok::<i32, ResolverError>(42)
                }
            }
        })
        .await;

        let retry_result = result.unwrap();
        assert_eq!(retry_result.result, 42);
        assert_eq!(retry_result.attempts_made, 3);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        let result = retry_quietly(&fast_config(4), "test", move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<i32, ResolverError>(ResolverError::HttpStatus {
                    code: 503,
                    url: "https://catalog.test".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(ResolverError::HttpStatus { code: 503, .. })
        ));
        assert_eq!(call_count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        let result = retry_quietly(&fast_config(5), "test", move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, ResolverError>(ResolverError::Parse("bad page".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ResolverError::Parse(_))));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: false,
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        assert_eq!(config.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_half_delay() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..50 {
            let delay = config.delay_for(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }
}
