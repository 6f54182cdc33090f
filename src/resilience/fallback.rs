//! Fallback dispatch.
//!
//! # Responsibilities
//! - Replace a failed chain result with the fallback's result
//! - Surface a failing fallback as terminal `FallbackFailure`
//!
//! # Design Decisions
//! - Outermost layer: it only sees fully resolved retry/breaker/timeout outcomes
//! - One fallback, no chaining
//! - Benign errors are returned as-is and never trigger the fallback

use std::sync::Arc;

use futures_util::FutureExt;

use super::operation::{Guarded, ProtectedOperation};
use super::outcome::{ErrorClass, OutcomeClassifier, PolicyError};
use crate::observability::metrics;

/// Terminal value of one `execute` call.
#[derive(Debug)]
pub enum ExecutionResult<T, E> {
    /// The operation itself succeeded.
    Completed(T),
    /// The fallback supplied the value; `cause` is why the chain failed.
    Recovered { value: T, cause: PolicyError<E> },
    /// No value could be produced.
    Failed(PolicyError<E>),
}

impl<T, E> ExecutionResult<T, E> {
    pub fn is_recovered(&self) -> bool {
        matches!(self, ExecutionResult::Recovered { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ExecutionResult::Completed(value) | ExecutionResult::Recovered { value, .. } => Some(value),
            ExecutionResult::Failed(_) => None,
        }
    }

    /// Collapse to a plain result, dropping the recovery metadata.
    pub fn into_result(self) -> Result<T, PolicyError<E>> {
        match self {
            ExecutionResult::Completed(value) | ExecutionResult::Recovered { value, .. } => Ok(value),
            ExecutionResult::Failed(error) => Err(error),
        }
    }
}

fn triggers_fallback<E, C>(error: &PolicyError<E>, classifier: &C) -> bool
where
    C: OutcomeClassifier<E> + ?Sized,
{
    match error {
        PolicyError::Operation(e) => classifier.classify(e) == ErrorClass::Failure,
        _ => true,
    }
}

/// Resolve the chain's result, invoking `fallback` with `input` on failure.
pub async fn dispatch<I, T, E, C>(
    primary: Result<T, PolicyError<E>>,
    fallback: &ProtectedOperation<I, T, E>,
    input: I,
    classifier: &C,
) -> ExecutionResult<T, E>
where
    C: OutcomeClassifier<E> + ?Sized,
{
    let cause = match primary {
        Ok(value) => return ExecutionResult::Completed(value),
        Err(cause) if !triggers_fallback(&cause, classifier) => {
            return ExecutionResult::Failed(cause);
        }
        Err(cause) => cause,
    };

    tracing::info!(
        operation = %fallback.name(),
        cause = cause.kind(),
        "Falling back"
    );

    match fallback.invoke(input).await {
        Ok(value) => {
            metrics::record_fallback(fallback.name(), "recovered");
            ExecutionResult::Recovered { value, cause }
        }
        Err(error) => {
            tracing::error!(
                operation = %fallback.name(),
                cause = cause.kind(),
                "Fallback failed"
            );
            metrics::record_fallback(fallback.name(), "failed");
            ExecutionResult::Failed(PolicyError::FallbackFailure {
                error,
                cause: Box::new(cause),
            })
        }
    }
}

/// Wrap an operation so its failures are replaced by `fallback`.
pub fn with_fallback<I, T, E>(
    op: Guarded<I, T, E>,
    fallback: ProtectedOperation<I, T, E>,
    classifier: Arc<dyn OutcomeClassifier<E>>,
) -> Guarded<I, T, E>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let name = op.shared_name();
    ProtectedOperation::from_boxed(name, move |input: I| {
        let primary = op.invoke(input.clone());
        let fallback = fallback.clone();
        let classifier = classifier.clone();
        async move {
            dispatch(primary.await, &fallback, input, classifier.as_ref())
                .await
                .into_result()
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::operation::guard;
    use crate::resilience::outcome::CountAll;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_fallback(calls: Arc<AtomicU32>) -> ProtectedOperation<u32, Vec<u32>, &'static str> {
        ProtectedOperation::new("recommendations", move |_id: u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![1]) }
        })
    }

    #[tokio::test]
    async fn test_success_skips_fallback() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = guard(ProtectedOperation::new("recommendations", |id: u32| async move {
            Ok::<_, &str>(vec![id, id + 1])
        }));
        let op = with_fallback(op, counting_fallback(calls.clone()), Arc::new(CountAll));

        for _ in 0..100 {
            assert_eq!(op.invoke(2).await.unwrap(), vec![2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_uses_fallback() {
        let calls = Arc::new(AtomicU32::new(0));
        let fallback = counting_fallback(calls.clone());
        let primary: Result<Vec<u32>, PolicyError<&str>> = Err(PolicyError::TimeoutExceeded {
            timeout: std::time::Duration::from_millis(250),
        });

        let result = dispatch(primary, &fallback, 2, &CountAll).await;
        assert!(result.is_recovered());
        assert_eq!(result.value(), Some(&vec![1]));
        match result {
            ExecutionResult::Recovered { cause, .. } => assert!(cause.is_timeout()),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_terminal() {
        let fallback = ProtectedOperation::new("recommendations", |_: u32| async { Err::<Vec<u32>, _>("empty") });
        let primary: Result<Vec<u32>, PolicyError<&str>> = Err(PolicyError::CircuitBreakerOpen {
            operation: "recommendations".into(),
        });

        match dispatch(primary, &fallback, 2, &CountAll).await {
            ExecutionResult::Failed(PolicyError::FallbackFailure { error, cause }) => {
                assert_eq!(error, "empty");
                assert!(cause.is_circuit_open());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_benign_error_skips_fallback() {
        let calls = Arc::new(AtomicU32::new(0));
        let primary: Result<Vec<u32>, PolicyError<&str>> = Err(PolicyError::Operation("not found"));
        let benign = |_: &&'static str| ErrorClass::Benign;

        let result = dispatch(primary, &counting_fallback(calls.clone()), 9, &benign).await;
        assert!(matches!(result, ExecutionResult::Failed(PolicyError::Operation("not found"))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
