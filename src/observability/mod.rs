//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Policy layers produce:
//!     → logging.rs (structured log events, one `execute` span per call)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Every `execute` span carries a fresh execution id
//! - Metrics are cheap (atomic increments) and safe without an exporter

pub mod logging;
pub mod metrics;
