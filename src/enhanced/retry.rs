//! Retry Logic
//!
//! Re-invokes a failed producer while a user predicate allows it.
//!
//! There is no implicit attempt cap and no delay between attempts: both are
//! the predicate's call. Attempts are driven by a loop, so stack depth does
//! not grow with the attempt count.
//!
//! ## Usage
//!
//! ```no_run
//! use tokio_call_enhancer::enhanced::retry::{run_with_retry, RetryPolicy};
//! # #[tokio::main]
//! # async fn main() {
//! let policy = RetryPolicy::new(|_err: &String, attempt| attempt <= 3);
//! let producer = |n: u32| async move { Ok::<u32, String>(n * 2) };
//!
//! let result = run_with_retry(&producer, 21, Some(&policy)).await;
//! assert_eq!(result, Ok(42));
//! # }
//! ```

use crate::metrics;
use crate::producer::Producer;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retry predicate: `(error, attempt) -> retry?`, attempts counted from 1.
pub type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;

/// Retry policy configuration
pub struct RetryPolicy<E> {
    predicate: RetryPredicate<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy").finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    /// Create a policy from a predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Retry any error until `max_attempts` attempts have been made in total.
    pub fn max_attempts(max_attempts: u32) -> Self {
        Self::new(move |_, attempt| attempt < max_attempts)
    }

    /// Whether the failed `attempt` should be followed by another one.
    pub fn should_retry(&self, error: &E, attempt: u32) -> bool {
        (self.predicate)(error, attempt)
    }
}

/// Invoke `producer` with `params`, retrying under `policy`.
///
/// Without a policy the first failure is returned unchanged.
///
/// # Errors
///
/// Returns the error of the last attempt once the policy declines to retry.
pub async fn run_with_retry<P, T, E>(
    producer: &(impl Producer<P, T, E> + ?Sized),
    params: P,
    policy: Option<&RetryPolicy<E>>,
) -> Result<T, E>
where
    P: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut attempt: u32 = 1;

    loop {
        debug!(attempt = attempt, "retry: invoking producer");

        match producer.produce(params.clone()).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "retry: producer succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => {
                let retry = policy.is_some_and(|policy| policy.should_retry(&error, attempt));
                if !retry {
                    if policy.is_some() {
                        warn!(attempts = attempt, "retry: giving up");
                    }
                    return Err(error);
                }

                warn!(attempt = attempt, "retry: producer failed, re-invoking");
                metrics::inc_retry();
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> impl Producer<u32, &'static str, String> {
        move |_: u32| {
            let calls = calls.clone();
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt <= failures {
                    Err(format!("failure {attempt}"))
                } else {
                    Ok("success")
                }
            }
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_fourth_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let producer = flaky(3, calls.clone());
        let policy = RetryPolicy::new(|_: &String, attempt| attempt <= 3);

        let result = run_with_retry(&producer, 0, Some(&policy)).await;

        assert_eq!(result, Ok("success"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_no_policy_propagates_first_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let producer = flaky(1, calls.clone());

        let result = run_with_retry(&producer, 0, None).await;

        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_predicate_sees_error_and_attempt() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let record = seen.clone();
        let policy = RetryPolicy::new(move |err: &String, attempt| {
            record.lock().push((err.clone(), attempt));
            attempt < 2
        });
        let producer = flaky(5, Arc::new(AtomicU32::new(0)));

        let result = run_with_retry(&producer, 0, Some(&policy)).await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(
            *seen.lock(),
            vec![("failure 1".to_string(), 1), ("failure 2".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_max_attempts_caps_total_invocations() {
        let calls = Arc::new(AtomicU32::new(0));
        let producer = flaky(10, calls.clone());
        let policy = RetryPolicy::max_attempts(3);

        let result = run_with_retry(&producer, 0, Some(&policy)).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_many_attempts_do_not_grow_the_stack() {
        let calls = Arc::new(AtomicU32::new(0));
        let producer = flaky(10_000, calls.clone());
        let policy = RetryPolicy::new(|_: &String, _| true);

        let result = run_with_retry(&producer, 0, Some(&policy)).await;

        assert_eq!(result, Ok("success"));
        assert_eq!(calls.load(Ordering::SeqCst), 10_001);
    }
}
