//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ratios in (0, 1])
//! - Check the observability section can actually be used
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;

use crate::config::schema::{EngineConfig, PolicySpec};
use crate::resilience::backoff::Backoff;

/// One semantic problem in a config file. `policy` is the table it was found
/// in: `defaults` or the operation name.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{policy}: timeout_ms must be greater than zero")]
    ZeroTimeout { policy: String },

    #[error("{policy}: request_volume_threshold must be at least 1")]
    ZeroRequestVolume { policy: String },

    #[error("{policy}: failure_ratio {ratio} must be in (0, 1]")]
    FailureRatioOutOfRange { policy: String, ratio: f64 },

    #[error("{policy}: half_open_success_threshold must be at least 1")]
    ZeroHalfOpenThreshold { policy: String },

    #[error("{policy}: backoff max_ms {max_ms} is below base_ms {base_ms}")]
    BackoffRange { policy: String, base_ms: u64, max_ms: u64 },

    #[error("invalid log level {0:?}")]
    LogLevel(String),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),
}

pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.observability.log_level.parse::<LevelFilter>().is_err() {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    validate_policy("defaults", &config.defaults, &mut errors);
    for (name, spec) in &config.policies {
        validate_policy(name, spec, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_policy(name: &str, spec: &PolicySpec, errors: &mut Vec<ValidationError>) {
    let policy = || name.to_string();

    if spec.timeout_ms == Some(0) {
        errors.push(ValidationError::ZeroTimeout { policy: policy() });
    }

    if let Some(retry) = &spec.retry {
        match retry.backoff {
            Some(Backoff::Exponential { base_ms, max_ms } | Backoff::ExponentialJitter { base_ms, max_ms })
                if max_ms < base_ms =>
            {
                errors.push(ValidationError::BackoffRange { policy: policy(), base_ms, max_ms });
            }
            _ => {}
        }
    }

    if let Some(breaker) = &spec.circuit_breaker {
        if breaker.request_volume_threshold == Some(0) {
            errors.push(ValidationError::ZeroRequestVolume { policy: policy() });
        }
        if let Some(ratio) = breaker.failure_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                errors.push(ValidationError::FailureRatioOutOfRange { policy: policy(), ratio });
            }
        }
        if breaker.half_open_success_threshold == Some(0) {
            errors.push(ValidationError::ZeroHalfOpenThreshold { policy: policy() });
        }
    }
}
