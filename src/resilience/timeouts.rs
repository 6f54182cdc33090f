//! Timeout enforcement.
//!
//! # Responsibilities
//! - Run each attempt on its own task and race it against a deadline
//! - Abort the task when the deadline wins, without waiting for it to stop
//! - Drop any result the abandoned task produces later
//!
//! # Design Decisions
//! - The join handle is the single-assignment result slot: whichever of
//!   completion or deadline resolves first decides the outcome
//! - Timeout errors are distinct from operation errors
//! - A missing timeout is a pass-through, not an infinite deadline

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time;

use super::operation::{Guarded, ProtectedOperation};
use super::outcome::PolicyError;
use crate::observability::metrics;

/// Aborts the attempt's task if the guard is dropped before it settles.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one attempt under a deadline.
pub async fn run_with_timeout<T, E>(
    attempt: BoxFuture<'static, Result<T, PolicyError<E>>>,
    timeout: Duration,
) -> Result<T, PolicyError<E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(attempt));

    match time::timeout(timeout, &mut task.0).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            if join_error.is_panic() {
                std::panic::resume_unwind(join_error.into_panic());
            }
            Err(PolicyError::Interrupted)
        }
        // `task` drops here and aborts the abandoned attempt.
        Err(_) => Err(PolicyError::TimeoutExceeded { timeout }),
    }
}

/// Wrap an operation so each call runs under `timeout`.
pub fn with_timeout<I, T, E>(op: Guarded<I, T, E>, timeout: Option<Duration>) -> Guarded<I, T, E>
where
    I: 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let Some(timeout) = timeout else {
        return op;
    };

    let name = op.shared_name();
    ProtectedOperation::from_boxed(name.clone(), move |input| {
        let attempt = op.invoke(input);
        let name = name.clone();
        async move {
            let result = run_with_timeout(attempt, timeout).await;
            if let Err(PolicyError::TimeoutExceeded { .. }) = &result {
                tracing::warn!(
                    operation = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Attempt timed out, abandoning in-flight work"
                );
                metrics::record_timeout(&name);
            }
            result
        }
        .boxed()
    })
}
