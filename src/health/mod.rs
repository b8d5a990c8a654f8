//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Per-backend timer
//!     → Probe one backend
//!     → Registry::record_probe (hysteresis in state.rs)
//!
//! Passive signals (passive.rs):
//!     Forwarding failure observed
//!     → ProbeTrigger::fast_probe
//!     → Active worker probes immediately
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy, Draining set by operator
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Probers report health, they never remove backends
//! - State transitions require consecutive successes/failures
//! - Health state is per-backend, not per-pool

pub mod active;
pub mod passive;
pub mod state;

pub use active::{HealthProber, HttpProbe, ProbeFailure};
pub use passive::ProbeTrigger;
pub use state::{HealthRecord, HealthState, ProbeOutcome, Thresholds, Transition};
