//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::backoff::Backoff;
use crate::resilience::executor::PolicyConfig;
use crate::resilience::retries::RetryPolicy;

/// Root configuration for the policy engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Policy applied to operations with no table of their own, and the base
    /// every named table overrides.
    pub defaults: PolicySpec,

    /// Per-operation policies, keyed by operation name.
    pub policies: BTreeMap<String, PolicySpec>,
}

impl EngineConfig {
    /// Resolve the policy for `operation`: its own table over `[defaults]`.
    pub fn policy_for(&self, operation: &str) -> PolicyConfig {
        match self.policies.get(operation) {
            Some(spec) => spec.over(self.defaults).resolve(),
            None => self.defaults.resolve(),
        }
    }
}

/// Policy table as written in the config file.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PolicySpec {
    /// Retry settings. Absent means no retry layer.
    pub retry: Option<RetrySpec>,

    /// Per-attempt deadline in milliseconds. Absent means no timeout.
    pub timeout_ms: Option<u64>,

    /// Breaker settings. Absent means no breaker.
    pub circuit_breaker: Option<CircuitBreakerSpec>,
}

impl PolicySpec {
    /// Fill every unset field from `base`, descending into the `retry` and
    /// `circuit_breaker` tables.
    pub fn over(self, base: PolicySpec) -> PolicySpec {
        PolicySpec {
            retry: merge_table(self.retry, base.retry, RetrySpec::over),
            timeout_ms: self.timeout_ms.or(base.timeout_ms),
            circuit_breaker: merge_table(
                self.circuit_breaker,
                base.circuit_breaker,
                CircuitBreakerSpec::over,
            ),
        }
    }

    /// Apply built-in defaults to whatever is still unset.
    pub fn resolve(&self) -> PolicyConfig {
        PolicyConfig {
            retry: self.retry.map(|r| r.resolve()),
            timeout: self.timeout_ms.map(Duration::from_millis),
            circuit_breaker: self.circuit_breaker.map(|cb| cb.resolve()),
        }
    }
}

fn merge_table<T>(own: Option<T>, base: Option<T>, over: fn(T, T) -> T) -> Option<T> {
    match (own, base) {
        (Some(own), Some(base)) => Some(over(own, base)),
        (own, base) => own.or(base),
    }
}

/// `[retry]` table. Unset fields inherit from `[defaults.retry]`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RetrySpec {
    pub max_retries: Option<u32>,
    pub backoff: Option<Backoff>,
}

impl RetrySpec {
    pub fn over(self, base: RetrySpec) -> RetrySpec {
        RetrySpec {
            max_retries: self.max_retries.or(base.max_retries),
            backoff: self.backoff.or(base.backoff),
        }
    }

    pub fn resolve(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or_default(),
            backoff: self.backoff.unwrap_or_default(),
        }
    }
}

/// `[circuit_breaker]` table. Unset fields inherit from
/// `[defaults.circuit_breaker]`, then from [`CircuitBreakerConfig::default`].
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerSpec {
    pub request_volume_threshold: Option<u32>,
    pub failure_ratio: Option<f64>,
    pub open_duration_ms: Option<u64>,
    pub half_open_success_threshold: Option<u32>,
}

impl CircuitBreakerSpec {
    pub fn over(self, base: CircuitBreakerSpec) -> CircuitBreakerSpec {
        CircuitBreakerSpec {
            request_volume_threshold: self.request_volume_threshold.or(base.request_volume_threshold),
            failure_ratio: self.failure_ratio.or(base.failure_ratio),
            open_duration_ms: self.open_duration_ms.or(base.open_duration_ms),
            half_open_success_threshold: self
                .half_open_success_threshold
                .or(base.half_open_success_threshold),
        }
    }

    pub fn resolve(&self) -> CircuitBreakerConfig {
        let builtin = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            request_volume_threshold: self
                .request_volume_threshold
                .unwrap_or(builtin.request_volume_threshold),
            failure_ratio: self.failure_ratio.unwrap_or(builtin.failure_ratio),
            open_duration_ms: self.open_duration_ms.unwrap_or(builtin.open_duration_ms),
            half_open_success_threshold: self
                .half_open_success_threshold
                .unwrap_or(builtin.half_open_success_threshold),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Rolling window size; the breaker never opens before this many outcomes.
    pub request_volume_threshold: u32,

    /// Failure fraction of a full window that opens the breaker.
    pub failure_ratio: f64,

    /// Time spent open before trial calls are admitted.
    pub open_duration_ms: u64,

    /// Trial successes needed to close again.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: 20,
            failure_ratio: 0.5,
            open_duration_ms: 5000,
            half_open_success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
