//! Retry with capped exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cepik::FetchError;
use crate::utils::fmt_duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Ceiling for server-suggested delays on rate-limit responses.
const MAX_RATE_LIMIT_DELAY: Duration = Duration::from_secs(30);

/// Delay before retrying after the `attempt`-th failure (1-based):
/// `min(1s * 2^(attempt-1), 10s)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    BASE_DELAY.saturating_mul(1 << exponent).min(MAX_BACKOFF)
}

/// Delay before retrying after `err`. A rate-limit response carrying
/// `Retry-After` can stretch the backoff, up to [`MAX_RATE_LIMIT_DELAY`].
pub fn delay_for(err: &FetchError, attempt: u32) -> Duration {
    let backoff = backoff_delay(attempt);
    match err.retry_after() {
        Some(suggested) if err.is_rate_limited() => {
            backoff.max(suggested).min(MAX_RATE_LIMIT_DELAY)
        }
        _ => backoff,
    }
}

/// Run `operation` up to `max_attempts` times (at least once).
///
/// Non-retryable errors return immediately. Retryable ones sleep per
/// [`delay_for`] and try again until attempts run out, at which point the
/// last error is returned.
pub async fn execute_with_retry<T, F, Fut>(
    task_id: &str,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(task_id, attempt, "Task succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                warn!(task_id, attempt, error = %e, "Task failed with non-retryable error");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(task_id, attempts = attempt, error = %e, "Task failed, retries exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = delay_for(&e, attempt);
                warn!(
                    task_id,
                    attempt,
                    max_attempts,
                    delay = fmt_duration(delay),
                    error = %e,
                    "Task failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn status(code: u16, retry_after: Option<Duration>) -> FetchError {
        FetchError::Status {
            status: code,
            url: "https://api.cepik.gov.pl/pojazdy".to_owned(),
            retry_after,
            reason: None,
            code: None,
        }
    }

    #[test]
    fn test_backoff_law() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(10));
        assert_eq!(backoff_delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_after_stretches_rate_limit_delay() {
        let err = status(429, Some(Duration::from_secs(5)));
        assert_eq!(delay_for(&err, 1), Duration::from_secs(5));

        let err = status(429, Some(Duration::from_secs(120)));
        assert_eq!(delay_for(&err, 1), Duration::from_secs(30));

        // Never shorter than the backoff.
        let err = status(429, Some(Duration::from_millis(100)));
        assert_eq!(delay_for(&err, 3), Duration::from_secs(4));

        // Only honoured for rate limiting.
        let err = status(503, Some(Duration::from_secs(20)));
        assert_eq!(delay_for(&err, 1), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_sleeps_one_then_two_seconds() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = execute_with_retry("02", 3, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(status(500, None)) } else { Ok(n) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_attempted_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<(), _> = execute_with_retry("04", 3, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(status(404, None))
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = execute_with_retry("06", 3, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(status(500 + n as u16, None))
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let _ = execute_with_retry("08", 0, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(status(500, None))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
