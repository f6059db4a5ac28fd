//! Retry helpers
//!
//! - [`retry_with_backoff`]: bounded retries with exponential backoff and full
//!   jitter, for transient vision engine failures.
//! - [`retry_on_lock`]: time-bounded retries for SQLite "database is locked".

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use divelog_common::{Error, Result};

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Cap for a single backoff delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Upper bound of the delay before retry number `retry` (0-based)
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Full jitter: uniform in [0, ceiling(retry)]
    pub fn jittered_delay<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let ceiling_ms = self.ceiling(retry).as_millis() as u64;
        Duration::from_millis(rng.gen_range(0..=ceiling_ms))
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
///
/// `is_retryable` decides which errors are transient. No new attempt is
/// started once `cancel` fires, including while a backoff sleep is pending;
/// the last error is returned instead.
///
/// # Arguments
/// * `operation_name` - Name for logging
/// * `policy` - Backoff parameters
/// * `cancel` - Optional cancellation token checked before and during each backoff
/// * `operation` - Async closure receiving the 0-based attempt number
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    is_retryable: P,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "Giving up after retries exhausted"
                    );
                    return Err(err);
                }
                if cancel.is_some_and(|token| token.is_cancelled()) {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        "Not retrying: cancellation requested"
                    );
                    return Err(err);
                }

                let delay = policy.jittered_delay(attempt, &mut rand::thread_rng());
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );
                match cancel {
                    Some(token) => tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {
                            tracing::info!(
                                operation = operation_name,
                                attempt,
                                "Backoff interrupted: cancellation requested"
                            );
                            return Err(err);
                        }
                    },
                    None => tokio::time::sleep(delay).await,
                }
                attempt += 1;
            }
        }
    }
}

/// Retry a database operation with exponential backoff until max_wait_ms elapses.
///
/// Only "database is locked" errors are retried; anything else fails
/// immediately. Backoff starts at 10ms and doubles up to 1000ms.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = match &err {
                    Error::Database(db_err) => db_err.to_string().contains("database is locked"),
                    _ => false,
                };

                if !is_lock_error {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_ceiling_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(0), Duration::from_millis(500));
        assert_eq!(policy.ceiling(1), Duration::from_millis(1000));
        assert_eq!(policy.ceiling(2), Duration::from_millis(2000));
        assert_eq!(policy.ceiling(10), Duration::from_secs(8));
        assert_eq!(policy.ceiling(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_ceiling() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 0..6 {
            for _ in 0..50 {
                assert!(policy.jittered_delay(retry, &mut rng) <= policy.ceiling(retry));
            }
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<&str, String> = retry_with_backoff(
            "test_op",
            &fast_policy(3),
            None,
            |_| true,
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("unavailable".to_string())
                    } else {
                        Ok("done")
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), String> = retry_with_backoff(
            "test_op",
            &fast_policy(3),
            None,
            |_| true,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unavailable".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), String> = retry_with_backoff(
            "test_op",
            &fast_policy(3),
            None,
            |e: &String| e != "permanent",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);

        let result: std::result::Result<(), String> = retry_with_backoff(
            "test_op",
            &fast_policy(3),
            Some(&token),
            |_| true,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unavailable".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_skips_next_attempt() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result: std::result::Result<(), String> = retry_with_backoff(
            "test_op",
            &policy,
            Some(&token),
            |_| true,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unavailable".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_on_lock_passes_through_other_errors() {
        let result: Result<()> = retry_on_lock("test_op", 100, || async {
            Err(Error::Internal("boom".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Internal(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_retry_on_lock_succeeds_first_attempt() {
        let result = retry_on_lock("test_op", 100, || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
