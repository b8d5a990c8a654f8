//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (peer address, headers)
//!     → session.rs (derive SessionKey)
//!     → router.rs (affinity lookup)
//!     → ring.rs (consistent hash over healthy backends)
//!     → Return: Backend or NoAvailableBackend
//! ```
//!
//! # Design Decisions
//! - Ring restricted to Healthy backends; Draining and Unhealthy are absent
//! - Deterministic: same input always routes to the same backend
//! - Failover walks the ring clockwise, so a recovered backend reclaims
//!   exactly its original key range

pub mod ring;
pub mod router;
pub mod session;

pub use router::{AffinityRouter, RouteError};
pub use session::{SessionKey, SessionKeyExtractor};
