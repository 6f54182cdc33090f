//! Circuit breaker for operation protection.
//!
//! # States
//! - Closed: normal operation, calls pass through and are recorded
//! - Open: operation assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: window full AND failures / window >= failure_ratio
//! Open → Half-Open: open_duration elapsed (checked on the next admission)
//! Half-Open → Closed: half_open_success_threshold trial successes (window reset)
//! Half-Open → Open: any trial failure (open timer restarts)
//! ```
//!
//! # Design Decisions
//! - Per-operation breaker (not global); unrelated operations never contend
//! - One mutex guards window, mode and trial counters so that recording an
//!   outcome and evaluating the transition it causes are a single step
//! - The mode is mirrored in an atomic for lock-free, possibly stale reads
//! - Every transition starts a new generation; outcomes admitted under an
//!   older generation are counted in totals but never touch the window

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::Instant;

use super::operation::{Guarded, ProtectedOperation};
use super::outcome::{Outcome, OutcomeClassifier, PolicyError};
use super::window::OutcomeWindow;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Mutable breaker state, only touched under the breaker's lock.
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    window: OutcomeWindow,
    opened_at: Option<Instant>,
    generation: u64,
    trial_successes: u32,
    trials_in_flight: u32,
}

/// Point-in-time view of a breaker, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub operation: String,
    pub state: CircuitState,
    pub window_len: usize,
    pub window_capacity: usize,
    pub window_failures: usize,
    pub failure_ratio: f64,
    pub open_for_ms: Option<u64>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub times_opened: u64,
}

/// Circuit breaker shared by every invocation of one operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    mode: AtomicU8,
    core: Mutex<BreakerCore>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
    times_opened: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::set_breaker_state(&name, CircuitState::Closed);
        Self {
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                window: OutcomeWindow::new(config.request_volume_threshold as usize),
                opened_at: None,
                generation: 0,
                trial_successes: 0,
                trials_in_flight: 0,
            }),
            name,
            config,
            mode: AtomicU8::new(CircuitState::Closed as u8),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Last published mode. May lag a concurrent transition, and does not
    /// apply the lazy Open → Half-Open check.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.mode.load(Ordering::Acquire))
    }

    /// Number of Closed → Open and Half-Open → Open transitions so far.
    pub fn times_opened(&self) -> u64 {
        self.times_opened.load(Ordering::Relaxed)
    }

    /// Ask to run one call. `None` means the call is denied.
    pub fn admit(self: &Arc<Self>) -> Option<BreakerPermit> {
        let mut core = self.lock();

        if core.state == CircuitState::Open {
            let open_duration = self.config.open_duration();
            let elapsed = core
                .opened_at
                .map_or(true, |opened_at| opened_at.elapsed() >= open_duration);
            if !elapsed {
                drop(core);
                self.reject();
                return None;
            }
            self.transition(&mut core, CircuitState::HalfOpen);
        }

        let trial = match core.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                if core.trials_in_flight >= self.config.half_open_success_threshold {
                    drop(core);
                    self.reject();
                    return None;
                }
                core.trials_in_flight += 1;
                true
            }
            CircuitState::Open => {
                drop(core);
                self.reject();
                return None;
            }
        };

        Some(BreakerPermit {
            breaker: self.clone(),
            generation: core.generation,
            trial,
            settled: false,
        })
    }

    /// Administrative reset: back to Closed with an empty window.
    pub fn reset(&self) {
        let mut core = self.lock();
        tracing::info!(
            operation = %self.name,
            from = core.state.as_str(),
            "Circuit breaker reset"
        );
        self.transition(&mut core, CircuitState::Closed);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.lock();
        BreakerSnapshot {
            operation: self.name.clone(),
            state: core.state,
            window_len: core.window.len(),
            window_capacity: core.window.capacity(),
            window_failures: core.window.failures(),
            failure_ratio: core.window.failure_ratio(),
            open_for_ms: match core.state {
                CircuitState::Open => core
                    .opened_at
                    .map(|opened_at| opened_at.elapsed().as_millis() as u64),
                _ => None,
            },
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            times_opened: self.times_opened.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reject(&self) {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
        metrics::record_rejection(&self.name);
        tracing::debug!(operation = %self.name, "Circuit breaker open, call denied");
    }

    /// Fold one outcome into the breaker. Recording and the transition it may
    /// cause happen under the same lock.
    fn settle(&self, generation: u64, trial: bool, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.total_successes.fetch_add(1, Ordering::Relaxed),
            Outcome::Failure => self.total_failures.fetch_add(1, Ordering::Relaxed),
        };

        let mut core = self.lock();
        if core.generation != generation {
            tracing::debug!(
                operation = %self.name,
                outcome = ?outcome,
                "Discarding outcome admitted before the last transition"
            );
            return;
        }
        if trial {
            core.trials_in_flight = core.trials_in_flight.saturating_sub(1);
        }

        match core.state {
            CircuitState::Closed => {
                core.window.record(outcome);
                if core.window.len() >= self.config.request_volume_threshold as usize
                    && core.window.failure_ratio() >= self.config.failure_ratio
                {
                    self.transition(&mut core, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => match outcome {
                Outcome::Success => {
                    core.trial_successes += 1;
                    if core.trial_successes >= self.config.half_open_success_threshold {
                        self.transition(&mut core, CircuitState::Closed);
                    }
                }
                Outcome::Failure => self.transition(&mut core, CircuitState::Open),
            },
            CircuitState::Open => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut core = self.lock();
        if core.generation == generation && core.state == CircuitState::HalfOpen {
            core.trials_in_flight = core.trials_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, core: &mut BreakerCore, to: CircuitState) {
        let from = core.state;
        core.state = to;
        core.generation += 1;
        core.trial_successes = 0;
        core.trials_in_flight = 0;

        match to {
            CircuitState::Open => {
                core.opened_at = Some(Instant::now());
                self.times_opened.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    operation = %self.name,
                    from = from.as_str(),
                    window_failures = core.window.failures(),
                    window_len = core.window.len(),
                    open_ms = self.config.open_duration_ms,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(
                    operation = %self.name,
                    "Circuit breaker transitioning to half-open"
                );
            }
            CircuitState::Closed => {
                core.window.clear();
                core.opened_at = None;
                tracing::info!(
                    operation = %self.name,
                    from = from.as_str(),
                    "Circuit breaker closed"
                );
            }
        }

        self.mode.store(to as u8, Ordering::Release);
        metrics::record_transition(&self.name, to);
    }
}

/// Admission to run one call. Dropping an unrecorded trial permit frees its
/// half-open slot without counting an outcome.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, outcome);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

/// Gate an operation behind `breaker`. Denied calls never reach `op`.
pub fn with_breaker<I, T, E>(
    op: Guarded<I, T, E>,
    breaker: Arc<CircuitBreaker>,
    classifier: Arc<dyn OutcomeClassifier<E>>,
) -> Guarded<I, T, E>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let name = op.shared_name();
    ProtectedOperation::from_boxed(name, move |input| {
        let op = op.clone();
        let breaker = breaker.clone();
        let classifier = classifier.clone();
        async move {
            let Some(permit) = breaker.admit() else {
                return Err(PolicyError::CircuitBreakerOpen {
                    operation: breaker.name().to_string(),
                });
            };
            let result = op.invoke(input).await;
            permit.record(Outcome::of(&result, classifier.as_ref()));
            result
        }
        .boxed()
    })
}
