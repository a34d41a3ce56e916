//! Retry policies for activities and for store outages.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// How often and how quickly a failing activity is retried.
///
/// The delay after failed attempt `n` (1-based) is
/// `initial_backoff * backoff_multiplier^(n - 1)`, capped at `max_backoff`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 count as 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with `max_attempts` and default backoff settings.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy that runs each activity once.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Effective number of attempts.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns true if another attempt follows failed attempt `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }

    /// Delay before the attempt that follows failed attempt `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay = self.initial_backoff.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(delay)
    }
}

/// Runs `op` again while it fails with a transient store error.
///
/// Gives up after `policy.attempts()` runs and returns the last error. Any
/// other error, and success, is returned at once. `op` must be safe to rerun
/// after an error that committed nothing.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(attempt, ?backoff, error = %e, "store unavailable, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use event_store::{EventStoreError, InstanceId};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_backoff_exponential() {
        let policy = RetryPolicy::new(5)
            .with_initial_backoff(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_backoff(Duration::from_secs(10));

        // Attempt 1: 100ms, attempt 2: 200ms, attempt 3: 400ms
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(50)
            .with_initial_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_secs(1));

        assert_eq!(policy.backoff_for(10), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_attempts_runs_once() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.attempts(), 1);
        assert!(!policy.should_retry(1));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_initial_backoff(Duration::from_millis(1))
    }

    fn unavailable() -> SchedulerError {
        SchedulerError::Store(EventStoreError::Unavailable("down".to_string()))
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let result = retry_transient(&quick(5), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unavailable())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_retries_stop_at_policy_limit() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = retry_transient(&quick(3), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = retry_transient(&quick(5), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SchedulerError::NotFound(InstanceId::from("missing")))
        })
        .await;

        assert!(matches!(result, Err(SchedulerError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
