//! Outcome classification and the failure taxonomy.
//!
//! # Responsibilities
//! - Classify operation errors as counting failures or benign results
//! - Define the failures the engine surfaces to callers
//! - Describe a single invocation attempt for logs and metrics
//!
//! # Design Decisions
//! - Failures are plain values; no layer panics or unwinds to signal one
//! - Benign errors reach the caller untouched: no retry, no fallback, and the
//!   breaker records them as successes

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Failures surfaced by the policy engine, generic over the operation's error.
#[derive(Debug)]
pub enum PolicyError<E> {
    /// The wrapped operation failed.
    Operation(E),

    /// An attempt did not finish within its deadline.
    TimeoutExceeded { timeout: Duration },

    /// Every permitted attempt failed.
    RetriesExhausted {
        attempts: u32,
        last: Box<PolicyError<E>>,
    },

    /// The call was denied without running the operation.
    CircuitBreakerOpen { operation: String },

    /// The fallback failed after the primary chain failed. Terminal.
    FallbackFailure {
        error: E,
        cause: Box<PolicyError<E>>,
    },

    /// The attempt's task stopped without producing a result.
    Interrupted,
}

impl<E: fmt::Display> fmt::Display for PolicyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::Operation(e) => write!(f, "operation failed: {}", e),
            PolicyError::TimeoutExceeded { timeout } => {
                write!(f, "operation timed out after {:?}", timeout)
            }
            PolicyError::RetriesExhausted { attempts, last } => {
                write!(f, "retries exhausted after {} attempts: {}", attempts, last)
            }
            PolicyError::CircuitBreakerOpen { operation } => {
                write!(f, "circuit breaker open for {}", operation)
            }
            PolicyError::FallbackFailure { error, cause } => {
                write!(f, "fallback failed: {} (after: {})", error, cause)
            }
            PolicyError::Interrupted => write!(f, "operation interrupted before completion"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for PolicyError<E> {}

impl<E> PolicyError<E> {
    /// Short, stable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyError::Operation(_) => "operation_failure",
            PolicyError::TimeoutExceeded { .. } => "timeout_exceeded",
            PolicyError::RetriesExhausted { .. } => "retries_exhausted",
            PolicyError::CircuitBreakerOpen { .. } => "circuit_breaker_open",
            PolicyError::FallbackFailure { .. } => "fallback_failure",
            PolicyError::Interrupted => "interrupted",
        }
    }

    /// The innermost failure, looking through retry exhaustion.
    pub fn root(&self) -> &PolicyError<E> {
        match self {
            PolicyError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// The operation's own error, if this failure carries one.
    pub fn operation_error(&self) -> Option<&E> {
        match self.root() {
            PolicyError::Operation(e) => Some(e),
            PolicyError::FallbackFailure { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), PolicyError::TimeoutExceeded { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self.root(), PolicyError::CircuitBreakerOpen { .. })
    }
}

/// How an operation error counts toward policy accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Counts as a failure: retried, recorded by the breaker, may fall back.
    Failure,
    /// A business result that happens to be an error; passed through as-is.
    Benign,
}

/// Pluggable classifier shared by the retry controller and the breaker.
pub trait OutcomeClassifier<E>: Send + Sync + 'static {
    fn classify(&self, error: &E) -> ErrorClass;
}

impl<E, F> OutcomeClassifier<E> for F
where
    F: Fn(&E) -> ErrorClass + Send + Sync + 'static,
{
    fn classify(&self, error: &E) -> ErrorClass {
        self(error)
    }
}

/// Treats every error as a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountAll;

impl<E> OutcomeClassifier<E> for CountAll {
    fn classify(&self, _error: &E) -> ErrorClass {
        ErrorClass::Failure
    }
}

/// Outcome recorded into breaker history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Fold an attempt's result into a breaker outcome.
    pub fn of<T, E, C>(result: &Result<T, PolicyError<E>>, classifier: &C) -> Self
    where
        C: OutcomeClassifier<E> + ?Sized,
    {
        match result {
            Ok(_) => Outcome::Success,
            Err(PolicyError::Operation(e)) => match classifier.classify(e) {
                ErrorClass::Failure => Outcome::Failure,
                ErrorClass::Benign => Outcome::Success,
            },
            Err(_) => Outcome::Failure,
        }
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
    Rejected,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
            AttemptOutcome::Timeout => "timeout",
            AttemptOutcome::Rejected => "rejected",
        }
    }
}

/// One execution of the underlying operation within a retry sequence.
#[derive(Debug, Clone, Copy)]
pub struct InvocationAttempt {
    /// Zero-based index within the retry sequence.
    pub index: u32,
    pub started: Instant,
    pub outcome: AttemptOutcome,
}

impl InvocationAttempt {
    pub fn begin(index: u32) -> Self {
        Self {
            index,
            started: Instant::now(),
            outcome: AttemptOutcome::Success,
        }
    }

    /// Settle the attempt from its result.
    pub fn finish<T, E>(mut self, result: &Result<T, PolicyError<E>>) -> Self {
        self.outcome = match result {
            Ok(_) => AttemptOutcome::Success,
            Err(err) if err.is_timeout() => AttemptOutcome::Timeout,
            Err(err) if err.is_circuit_open() => AttemptOutcome::Rejected,
            Err(_) => AttemptOutcome::Failure,
        };
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
