//! Idempotent-remote-call helper: exponential backoff with jitter, shared by
//! both remote clients so per-call retry policy lives in exactly one place.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Backoff parameters: total attempt count, base delay, and growth factor.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following failed attempt `attempt` (0-indexed),
    /// `base * factor^attempt` plus jitter of up to one base delay so that
    /// concurrent per-asset calls hitting the same outage spread out.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64;
        let scaled = base * self.backoff_factor.powi(attempt as i32);
        // Cap at ten bases; a stuck remote should fail the asset, not the hour.
        let capped = scaled.min(base * 10.0);
        let jitter = if base > 0.0 {
            rand::thread_rng().gen_range(0.0..base)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter) as u64)
    }
}

/// Run `operation` until it succeeds, the classifier says `Abort`, or the
/// attempt budget is exhausted. Returns the first `Ok` or the last error.
pub async fn call_with_retry<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut last_err: Option<E> = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort {
                    return Err(e);
                }
                if attempt + 1 >= attempts {
                    last_err = Some(e);
                    break;
                }
                let delay = config.delay_after_attempt(attempt);
                tracing::warn!(
                    "Transient error (attempt {}/{}), retrying in {}ms: {}",
                    attempt + 1,
                    attempts,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_err.expect("at least one attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn instant_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::ZERO,
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn delay_grows_by_factor() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        };
        // attempt 0: 100 + jitter(0..100) => [100, 200)
        let d = config.delay_after_attempt(0);
        assert!(d.as_millis() >= 100 && d.as_millis() < 200);
        // attempt 2: 400 + jitter(0..100) => [400, 500)
        let d = config.delay_after_attempt(2);
        assert!(d.as_millis() >= 400 && d.as_millis() < 500);
    }

    #[test]
    fn delay_is_capped() {
        let config = RetryConfig {
            max_attempts: 20,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        };
        // attempt 10 would be 102_400ms uncapped; cap is 1_000 + jitter(0..100).
        let d = config.delay_after_attempt(10);
        assert!(d.as_millis() >= 1_000 && d.as_millis() < 1_100);
    }

    #[test]
    fn zero_base_delay_yields_zero() {
        let config = instant_config(3);
        assert_eq!(config.delay_after_attempt(0), Duration::ZERO);
    }

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let result: Result<i32, String> =
            call_with_retry(&instant_config(3), |_| RetryAction::Retry, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn abort_stops_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<i32, String> = call_with_retry(
            &instant_config(3),
            |_| RetryAction::Abort,
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("not found".to_string())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "not found");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<i32, String> = call_with_retry(
            &instant_config(4),
            |_| RetryAction::Retry,
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("timeout".to_string())
                    } else {
                        Ok(1)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<i32, String> = call_with_retry(
            &instant_config(3),
            |_| RetryAction::Retry,
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("still down".to_string())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "still down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
