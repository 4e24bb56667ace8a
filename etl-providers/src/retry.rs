//! Exponential backoff for transient and rate-limited provider errors,
//! bounded to a fixed number of attempts before the caller treats the step
//! as failed.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(500), max_delay: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(explicit) = retry_after {
            return explicit.min(self.max_delay);
        }
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
        let jittered = rand::thread_rng().gen_range(0..=exp / 4 + 1);
        Duration::from_millis(exp.saturating_add(jittered)).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, exhausts `policy.max_attempts`, or fails
/// with a non-retryable [`crate::error::ProviderErrorKind`]. `step_name` is
/// only used for the warning log emitted on each retry.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    step_name: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt, err.retry_after);
                warn!(step = step_name, attempt, ?delay, kind = ?err.kind, "retrying provider call");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5) };
        let result = retry_with_backoff(policy, "jira_issues_with_changelogs", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ProviderError::transient("timeout"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<u32, _> = retry_with_backoff(policy, "jira_dev_status", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::permanent("bad request"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5) };
        let result: Result<u32, _> = retry_with_backoff(policy, "jira_sprint_reports", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::transient("timeout"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
