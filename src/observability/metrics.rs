//! Metrics collection and exposition.
//!
//! # Metrics
//! - `policy_attempts_total` (counter): attempts by operation, outcome
//! - `policy_retries_total` (counter): retries scheduled by operation
//! - `policy_timeouts_total` (counter): attempts cut off by the deadline
//! - `policy_fallbacks_total` (counter): fallback invocations by result
//! - `breaker_rejections_total` (counter): calls denied by an open breaker
//! - `breaker_transitions_total` (counter): state changes by target state
//! - `breaker_state` (gauge): 0=closed, 1=open, 2=half_open
//! - `policy_execute_duration_seconds` (histogram): end-to-end execute latency
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are operation names and fixed outcome strings only

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::time::Instant;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::outcome::AttemptOutcome;

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_attempt(operation: &str, outcome: AttemptOutcome) {
    counter!(
        "policy_attempts_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_retry(operation: &str) {
    counter!("policy_retries_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_timeout(operation: &str) {
    counter!("policy_timeouts_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_fallback(operation: &str, result: &'static str) {
    counter!(
        "policy_fallbacks_total",
        "operation" => operation.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_rejection(operation: &str) {
    counter!("breaker_rejections_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_transition(operation: &str, to: CircuitState) {
    counter!(
        "breaker_transitions_total",
        "operation" => operation.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    set_breaker_state(operation, to);
}

pub fn set_breaker_state(operation: &str, state: CircuitState) {
    gauge!("breaker_state", "operation" => operation.to_string()).set(state as u8 as f64);
}

/// Record one finished `execute` call started at `start_time`.
pub fn record_execution(operation: &str, result: &'static str, start_time: Instant) {
    histogram!(
        "policy_execute_duration_seconds",
        "operation" => operation.to_string(),
        "result" => result
    )
    .record(start_time.elapsed().as_secs_f64());
}
