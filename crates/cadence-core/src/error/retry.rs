//! Retry executor with a fixed backoff schedule.
//!
//! Retryable failures are re-attempted up to `max_attempts` total attempts,
//! sleeping `backoff_ms[n]` before retry `n` (the last entry is reused when
//! the schedule is shorter). A retryable failure that survives the last
//! attempt is re-classified as an escalation. Recoverable and escalation
//! failures return immediately.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use cadence_types::config::RetryPolicy;
use cadence_types::error::{ErrorCategory, ErrorContext, ErrorType};

use super::Classified;
use super::classifier::classify_error;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then try again.
    Retry { delay: Duration },
    /// Stop; the failure is final with this classification.
    GiveUp { error_type: ErrorType, exhausted: bool },
}

/// The final failure of a retried operation.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Final classification (retryable failures become escalations).
    pub error_type: ErrorType,
    /// True when the failure was retryable but the attempts ran out.
    pub exhausted: bool,
}

impl<E> RetryFailure<E> {
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exhausted {
            write!(f, "{} (gave up after {} attempts)", self.error, self.attempts)
        } else {
            self.error.fmt(f)
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryFailure<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<E: Classified + 'static> Classified for RetryFailure<E> {
    fn category(&self) -> ErrorCategory {
        self.error.category()
    }

    fn retries_exhausted(&self) -> bool {
        self.exhausted || self.error.retries_exhausted()
    }
    fn requires_operator(&self) -> bool {
        self.error.requires_operator()
    }
}

/// Stateless retry executor bound to one policy.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what happens after attempt `attempt` (1-based) failed.
    pub fn decide<E: Classified + ?Sized>(
        &self,
        attempt: u32,
        error: &E,
        context: &ErrorContext,
    ) -> RetryDecision {
        let max_attempts = self.policy.max_attempts.max(1);
        match classify_error(error, context) {
            ErrorType::Retryable if attempt < max_attempts => RetryDecision::Retry {
                delay: self.policy.delay_for(attempt.saturating_sub(1)),
            },
            ErrorType::Retryable => RetryDecision::GiveUp {
                error_type: ErrorType::Escalation,
                exhausted: true,
            },
            error_type => RetryDecision::GiveUp {
                error_type,
                exhausted: false,
            },
        }
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        context: &ErrorContext,
        mut operation: F,
    ) -> Result<T, RetryFailure<E>>
    where
        E: Classified,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.decide(attempt, &error, context) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        operation = %context.operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        category = %error.category(),
                        "retryable failure, backing off: {error}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp { error_type, exhausted } => {
                    if exhausted {
                        tracing::warn!(
                            operation = %context.operation,
                            attempts = attempt,
                            "retries exhausted, escalating: {error}"
                        );
                    }
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        error_type,
                        exhausted,
                    });
                }
            }
        }
    }
}

/// Convenience wrapper: run `operation` under `policy`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    context: &ErrorContext,
    operation: F,
) -> Result<T, RetryFailure<E>>
where
    E: Classified,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryExecutor::new(policy.clone()).run(context, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use cadence_types::error::Component;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, thiserror::Error)]
    #[error("{category} failure")]
    struct TestError {
        category: ErrorCategory,
    }

    impl Classified for TestError {
        fn category(&self) -> ErrorCategory {
            self.category
        }
    }

    fn ctx() -> ErrorContext {
        ErrorContext::new(Component::Pool, "invoke", ErrorCategory::Unknown, "")
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_is_deterministic() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let policy = RetryPolicy::default();

        let result: Result<(), _> = retry_with_backoff(&policy, &ctx(), |_| {
            let calls = calls.clone();
            async move {
                calls.lock().await.push(Instant::now());
                Err(TestError { category: ErrorCategory::Timeout })
            }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error_type, ErrorType::Escalation);
        assert!(failure.exhausted);

        let calls = calls.lock().await;
        assert_eq!(calls.len(), 3);
        assert!(calls[1] - calls[0] >= Duration::from_secs(1));
        assert!(calls[2] - calls[1] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let result = retry_with_backoff(&RetryPolicy::default(), &ctx(), |attempt| {
            let calls = calls.clone();
            async move {
                calls.lock().await.push(Instant::now());
                if attempt < 3 {
                    Err(TestError { category: ErrorCategory::Network })
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        let calls = calls.lock().await;
        assert_eq!(calls.len(), 3);
        assert!(calls[1] - calls[0] >= Duration::from_secs(1));
        assert!(calls[2] - calls[1] >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn non_retryable_failure_returns_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::default(), &ctx(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { category: ErrorCategory::Validation })
            }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(failure.error_type, ErrorType::Escalation);
        assert!(!failure.exhausted);
        assert!(!failure.retries_exhausted());
    }

    #[tokio::test]
    async fn optional_not_found_is_recoverable() {
        let context = ctx().optional(true);
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::default(), &context, |_| async {
            Err(TestError { category: ErrorCategory::NotFound })
        })
        .await;
        assert_eq!(result.unwrap_err().error_type, ErrorType::Recoverable);
    }

    #[test]
    fn decide_uses_zero_based_schedule_index() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 4,
            backoff_ms: vec![10, 20],
        });
        let error = TestError { category: ErrorCategory::RateLimited };
        assert_eq!(
            executor.decide(1, &error, &ctx()),
            RetryDecision::Retry { delay: Duration::from_millis(10) }
        );
        assert_eq!(
            executor.decide(3, &error, &ctx()),
            RetryDecision::Retry { delay: Duration::from_millis(20) }
        );
        assert_eq!(
            executor.decide(4, &error, &ctx()),
            RetryDecision::GiveUp { error_type: ErrorType::Escalation, exhausted: true }
        );
    }
}
