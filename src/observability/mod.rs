//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, one subscriber)
//!     → metrics.rs (counters, histograms through the metrics facade)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every request span
//! - Debug-level cache and write-back logs are gated by `debug.logs`

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
