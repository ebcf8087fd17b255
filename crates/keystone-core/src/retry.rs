//! Retry utilities for connecting to external collaborators.
//!
//! Uses `backon` for exponential backoff with jitter. The database pool and
//! the broker connection are both established through [`connect_with_retry`].

use backon::{ExponentialBuilder, Retryable};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given retry count and default delays.
    #[must_use]
    pub fn with_max_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Builds the `backon` backoff for this policy.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

impl Default for RetryPolicy {
    /// 5 retries, 100ms to 5s.
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Runs `connect` until it succeeds or the policy is exhausted.
///
/// Each failed attempt is logged with the target name and the next delay.
/// The last error is returned once retries run out.
pub async fn connect_with_retry<T, E, F, Fut>(
    target: &str,
    policy: &RetryPolicy,
    connect: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    connect
        .retry(policy.backoff())
        .notify(|err: &E, dur: Duration| {
            warn!(target_name = %target, error = %err, delay = ?dur, "Connection failed, retrying");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(RetryPolicy::with_max_retries(2).max_retries, 2);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let result: Result<&str, String> = connect_with_retry("db", &fast(5), || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("refused".to_string())
            } else {
                Ok("connected")
            }
        })
        .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), String> = connect_with_retry("broker", &fast(2), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("unreachable".to_string())
        })
        .await;

        assert_eq!(result, Err("unreachable".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
