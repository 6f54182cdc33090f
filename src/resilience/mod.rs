//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! execute(input):
//!     → fallback.rs (outermost; only sees fully resolved failures)
//!     → retries.rs (re-invoke failed attempts, backoff between them)
//!     → circuit_breaker.rs (deny while open, record every admitted outcome)
//!     → timeouts.rs (per-attempt deadline, late attempts are aborted)
//!     → operation.rs (the caller's unit of work)
//! ```
//!
//! # Design Decisions
//! - Each layer maps a `Guarded` operation to another, so absent policies are
//!   simply not applied
//! - Breaker state is per operation name and shared through the registry
//! - Failures are values (`PolicyError`); nothing is signalled by panicking

pub mod backoff;
pub mod circuit_breaker;
pub mod executor;
pub mod fallback;
pub mod faults;
pub mod operation;
pub mod outcome;
pub mod registry;
pub mod retries;
pub mod runtime;
pub mod service;
pub mod timeouts;
pub mod window;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use executor::{PolicyChain, PolicyChainBuilder, PolicyConfig};
pub use fallback::ExecutionResult;
pub use operation::{Guarded, ProtectedOperation};
pub use outcome::{CountAll, ErrorClass, OutcomeClassifier, PolicyError};
pub use registry::BreakerRegistry;
pub use retries::RetryPolicy;
pub use runtime::PolicyRuntime;
