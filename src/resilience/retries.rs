//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed attempt may be retried
//! - Re-invoke the inner chain up to `max_retries + 1` times, strictly in sequence
//! - Tag budget exhaustion so callers can tell it apart from a single failure
//!
//! # Design Decisions
//! - Breaker denials are never retried; they burn no retry budget
//! - Benign errors are returned immediately
//! - The backoff hook runs between attempts, never before the first

use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use super::backoff::Backoff;
use super::operation::{Guarded, ProtectedOperation};
use super::outcome::{ErrorClass, InvocationAttempt, OutcomeClassifier, PolicyError};
use crate::observability::metrics;

/// Retry bound and backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts allowed after the first one.
    pub max_retries: u32,

    /// Delay hook between attempts.
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Determine if a failure may be retried.
pub fn is_retryable<E, C>(error: &PolicyError<E>, classifier: &C) -> bool
where
    C: OutcomeClassifier<E> + ?Sized,
{
    match error {
        PolicyError::Operation(e) => classifier.classify(e) == ErrorClass::Failure,
        PolicyError::TimeoutExceeded { .. } => true,
        PolicyError::CircuitBreakerOpen { .. }
        | PolicyError::RetriesExhausted { .. }
        | PolicyError::FallbackFailure { .. }
        | PolicyError::Interrupted => false,
    }
}

/// Invoke `op` until it succeeds, fails with a non-retryable error, or the
/// budget runs out.
pub async fn run_with_retry<I, T, E, C>(
    op: &Guarded<I, T, E>,
    input: I,
    policy: RetryPolicy,
    classifier: &C,
) -> Result<T, PolicyError<E>>
where
    I: Clone,
    C: OutcomeClassifier<E> + ?Sized,
{
    let mut index: u32 = 0;
    loop {
        let attempt = InvocationAttempt::begin(index);
        let result = op.invoke(input.clone()).await;
        let attempt = attempt.finish(&result);

        metrics::record_attempt(op.name(), attempt.outcome);
        tracing::debug!(
            operation = %op.name(),
            attempt = attempt.index,
            outcome = attempt.outcome.as_str(),
            elapsed_ms = attempt.elapsed().as_millis() as u64,
            "Attempt finished"
        );

        let error = match result {
            Ok(value) => {
                if index > 0 {
                    tracing::debug!(
                        operation = %op.name(),
                        attempts = index + 1,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !is_retryable(&error, classifier) {
            tracing::debug!(
                operation = %op.name(),
                kind = error.kind(),
                "Non-retryable failure"
            );
            return Err(error);
        }

        if index >= policy.max_retries {
            tracing::warn!(
                operation = %op.name(),
                max_retries = policy.max_retries,
                kind = error.kind(),
                "Max retries exceeded"
            );
            return Err(PolicyError::RetriesExhausted {
                attempts: index + 1,
                last: Box::new(error),
            });
        }

        index += 1;
        let delay = policy.backoff.delay(index);
        tracing::info!(
            operation = %op.name(),
            attempt = index,
            delay = ?delay,
            kind = error.kind(),
            "Retrying operation"
        );
        metrics::record_retry(op.name());
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

/// Wrap an operation with the retry controller.
pub fn with_retry<I, T, E>(
    op: Guarded<I, T, E>,
    policy: RetryPolicy,
    classifier: Arc<dyn OutcomeClassifier<E>>,
) -> Guarded<I, T, E>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let name = op.shared_name();
    ProtectedOperation::from_boxed(name, move |input| {
        let op = op.clone();
        let classifier = classifier.clone();
        async move { run_with_retry(&op, input, policy, classifier.as_ref()).await }.boxed()
    })
}
