//! Retry with exponential backoff for adapter calls

use crate::error::CloudError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Why [`with_retry`] gave up
#[derive(Debug)]
pub enum RetryError {
    /// Last adapter error, with the number of attempts made
    Failed { error: CloudError, attempts: u32 },
    /// Cancelled while sleeping between attempts
    Cancelled { attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Failed { attempts, .. } | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Runs `op` until it succeeds, fails permanently or runs out of attempts.
///
/// Only transient errors are retried. Returns the value together with the
/// number of attempts it took.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<(T, u32), RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                }
            }
            Err(error) => {
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(4), Duration::from_secs(8));
        assert_eq!(config.delay_for(6), Duration::from_secs(30));
        assert_eq!(config.delay_for(200), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(
            &RetryConfig::default(),
            &CancellationToken::new(),
            "create vpc",
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CloudError::Throttled("slow down".into()))
                    } else {
                        Ok("vpc-1")
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, ("vpc-1", 3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = with_retry(
            &RetryConfig::default(),
            &CancellationToken::new(),
            "create vpc",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CloudError::Timeout("read".into())) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(err, RetryError::Failed { error: CloudError::Timeout(_), .. }));
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = with_retry(
            &RetryConfig::default(),
            &CancellationToken::new(),
            "create subnet",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CloudError::Rejected("cidr overlaps".into())) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = with_retry(&RetryConfig::default(), &cancel, "delete vpc", || async {
            Err::<(), _>(CloudError::Unavailable("endpoint".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RetryError::Cancelled { attempts: 1 }));
    }
}
