//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! reconciler / reload manager / repositories produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (pass and entity counters, conflict gauge)
//!
//! Consumers:
//!     → stdout via tracing-subscriber fmt layer
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
