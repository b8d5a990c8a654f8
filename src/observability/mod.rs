//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → events.rs (structured events: health, routing, reconciliation)
//!     → logging.rs (structured log output)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments)

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventSink, RoutingFailureKind, TracingEventSink};
#[cfg(any(test, feature = "test-util"))]
pub use events::RecordingEventSink;
