//! Bounded retry with exponential backoff
//!
//! Every remote call made by a source reader goes through a [`RetryPolicy`]. An attempt
//! reports either a transient failure, which is retried until the policy is exhausted and
//! then surfaces as `SourceUnavailable`, or a fatal error, which is returned immediately.

use retail_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry (in milliseconds).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

/// Default cap on a single backoff delay (in milliseconds).
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Failure of a single attempt
#[derive(Debug)]
pub enum AttemptError {
    /// Worth retrying: timeouts, connection resets, HTTP 5xx and 429
    Transient(String),
    /// Retrying cannot help
    Fatal(EtlError),
}

impl AttemptError {
    pub fn transient(message: impl ToString) -> Self {
        AttemptError::Transient(message.to_string())
    }
}

impl From<EtlError> for AttemptError {
    fn from(err: EtlError) -> Self {
        AttemptError::Fatal(err)
    }
}

/// Successful result together with the number of retries it took
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Retry schedule: `initial_delay * multiplier^(retry - 1)`, capped at `max_delay`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            multiplier: 2.0,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the given retry (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. `operation` names the call in logs
    /// and in the terminal `SourceUnavailable` error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<Retried<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(operation, attempt, max_attempts, "Attempting request");

            match op(attempt).await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        retries: attempt - 1,
                    })
                },
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(message)) => {
                    last_error = message;
                    if attempt < max_attempts {
                        let delay = self.delay_for(attempt);
                        warn!(
                            operation,
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "Request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(EtlError::source_unavailable(
            operation,
            format!("failed after {} attempts: {}", max_attempts, last_error),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use retail_common::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_schedule_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 500,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("page 2", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AttemptError::transient("HTTP 503"))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "ok");
        assert_eq!(result.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_source_unavailable() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::immediate(3)
            .run("number_stores", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AttemptError::transient("connection reset")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::immediate(5)
            .run("events", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AttemptError::Fatal(EtlError::decode("not json"))) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DecodeError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        };
        let start = tokio::time::Instant::now();

        let _ = policy
            .run("slow", |_| async { Err::<(), _>(AttemptError::transient("busy")) })
            .await;

        assert!(start.elapsed() >= Duration::from_millis(3_000));
    }
}
