//! Exponential backoff retry for GitHub API calls.
//!
//! Only transient errors are retried. Permanent errors and conflicts are
//! returned on the first occurrence.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::{GitHubApiError, GitHubErrorKind};

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 3 retries after 2s, 4s and 8s.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Whether an operation may be retried at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry transient errors with backoff. For idempotent requests.
    #[default]
    RetryTransient,

    /// Single attempt. For requests that must not be repeated blindly.
    NoRetry,
}

/// How a retried operation ended.
#[derive(Debug)]
pub enum RetryResult<T> {
    Success(T),

    /// Still failing transiently after the last permitted attempt.
    ExhaustedRetries {
        last_error: GitHubApiError,
        attempts: u32,
    },

    PermanentError(GitHubApiError),

    Conflict(GitHubApiError),
}

impl<T> RetryResult<T> {
    pub fn into_result(self) -> Result<T, GitHubApiError> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::PermanentError(e) | RetryResult::Conflict(e) => Err(e),
        }
    }
}

/// Runs `operation` until it succeeds, fails non-transiently, or runs out of
/// attempts under `policy`.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    policy: RetryPolicy,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GitHubApiError>>,
{
    let max_attempts = match policy {
        RetryPolicy::NoRetry => 1,
        RetryPolicy::RetryTransient => config.max_retries + 1,
    };

    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(err) => err,
        };
        attempt += 1;

        match err.kind {
            GitHubErrorKind::Permanent => return RetryResult::PermanentError(err),
            GitHubErrorKind::Conflict => return RetryResult::Conflict(err),
            GitHubErrorKind::Transient if attempt >= max_attempts => {
                return RetryResult::ExhaustedRetries {
                    last_error: err,
                    attempts: attempt,
                };
            }
            GitHubErrorKind::Transient => {
                let delay = config.delay_for_attempt(attempt - 1);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient GitHub error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(10),
            2.0,
        )
    }

    fn conflict() -> GitHubApiError {
        GitHubApiError {
            kind: GitHubErrorKind::Conflict,
            status_code: Some(422),
            message: "Update is not a fast forward".to_string(),
            source: None,
        }
    }

    #[test]
    fn default_delays_are_2_4_8() {
        let delays: Vec<_> = RetryConfig::DEFAULT.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(RetryConfig::DEFAULT.total_max_wait(), Duration::from_secs(14));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(fast(3), RetryPolicy::RetryTransient, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GitHubApiError::transient_without_source("502"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.into_result().unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(fast(2), RetryPolicy::RetryTransient, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(GitHubApiError::transient_without_source("down")) }
        })
        .await;

        match &result {
            RetryResult::ExhaustedRetries { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = result.into_result().unwrap_err();
        assert_eq!(err.kind, GitHubErrorKind::Transient);
        assert_eq!(err.message, "down");
    }

    #[tokio::test]
    async fn permanent_and_conflict_errors_stop_immediately() {
        for (error, is_conflict) in [
            (GitHubApiError::permanent_without_source("Not Found"), false),
            (conflict(), true),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();

            let result = retry_with_backoff(fast(3), RetryPolicy::RetryTransient, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let error = error.clone();
                async move { Err::<(), _>(error) }
            })
            .await;

            assert_eq!(
                matches!(result, RetryResult::Conflict(_)),
                is_conflict,
                "{:?}",
                result
            );
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn no_retry_makes_a_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(fast(3), RetryPolicy::NoRetry, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(GitHubApiError::transient_without_source("flaky")) }
        })
        .await;

        assert!(result.into_result().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    proptest! {
        /// Property: delays never exceed the cap and never shrink
        #[test]
        fn prop_delays_capped_and_monotonic(
            initial_ms in 1u64..1000,
            max_ms in 1000u64..60000,
            multiplier in 1.0f64..3.0,
            max_retries in 1u32..15,
        ) {
            let config = RetryConfig::new(
                max_retries,
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
            );
            let delays: Vec<_> = config.delays().collect();

            prop_assert_eq!(delays[0], Duration::from_millis(initial_ms));
            for window in delays.windows(2) {
                prop_assert!(window[1] >= window[0]);
            }
            prop_assert!(delays.iter().all(|d| *d <= Duration::from_millis(max_ms)));
        }
    }
}
