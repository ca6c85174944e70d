//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle controller and interceptors produce:
//!     → logging.rs (structured tracing events, global subscriber)
//!     → metrics.rs (call counters, latency histograms, service gauge)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - One global subscriber; installing it twice is a no-op so embedders can
//!   bring their own
//! - Metrics go through the `metrics` facade and cost nothing without an
//!   installed recorder

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use self::metrics::{init_metrics, record_call, set_registered_services};
