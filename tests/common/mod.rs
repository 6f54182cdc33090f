//! Shared utilities for integration and load testing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fault_tolerance::config::CircuitBreakerConfig;
use fault_tolerance::resilience::faults::FaultSource;
use fault_tolerance::ProtectedOperation;

pub type TestOp = ProtectedOperation<u32, u32, &'static str>;

/// Operation that fails whenever `faults` says so. Returns the operation and
/// its invocation counter.
pub fn faulty_op(name: &str, faults: impl FaultSource) -> (TestOp, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = ProtectedOperation::new(name, move |input: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        let fail = faults.should_fail();
        async move {
            if fail {
                Err("Service failed.")
            } else {
                Ok(input)
            }
        }
    });
    (op, calls)
}

/// Operation that fails on its first `failures` invocations, then succeeds.
#[allow(dead_code)]
pub fn failing_first(name: &str, failures: u32) -> (TestOp, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = ProtectedOperation::new(name, move |input: u32| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                Err("Resource failure.")
            } else {
                Ok(input)
            }
        }
    });
    (op, calls)
}

/// Operation that sleeps for `delay` before succeeding. The second counter
/// only moves when an invocation runs to completion.
#[allow(dead_code)]
pub fn slow_op(name: &str, delay: Duration) -> (TestOp, Arc<AtomicU32>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let completions = Arc::new(AtomicU32::new(0));
    let (counter, done) = (calls.clone(), completions.clone());
    let op = ProtectedOperation::new(name, move |input: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        let done = done.clone();
        async move {
            tokio::time::sleep(delay).await;
            done.fetch_add(1, Ordering::SeqCst);
            Ok(input)
        }
    });
    (op, calls, completions)
}

#[allow(dead_code)]
pub fn breaker(threshold: u32, ratio: f64, open_ms: u64, half_open: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        request_volume_threshold: threshold,
        failure_ratio: ratio,
        open_duration_ms: open_ms,
        half_open_success_threshold: half_open,
    }
}
