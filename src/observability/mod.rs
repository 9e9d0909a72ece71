//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Boot stages, supervisor, HTTP layer produce:
//!     → logging.rs (tracing subscriber, structured fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape (optional)
//! ```

pub mod logging;
pub mod metrics;
