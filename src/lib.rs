//! Resilience policy engine: retry, timeout, circuit breaker and fallback
//! composed around async operations.

pub mod config;
pub mod observability;
pub mod resilience;

pub use config::EngineConfig;
pub use resilience::{PolicyChain, PolicyError, PolicyRuntime, ProtectedOperation};
