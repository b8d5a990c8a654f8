//! Backend pool subsystem.
//!
//! # Data Flow
//! ```text
//! Static config / admin API / provisioned instance
//!     → registry.rs (register, remove, drain)
//!     → backend.rs (per-backend health record + in-flight count)
//!
//! Prober / operator
//!     → registry.rs (record_probe, set_health)
//!     → routing::ring (add/remove that backend's points on class change)
//! ```
//!
//! # Design Decisions
//! - The registry is the single writer of health state
//! - Readers get immutable snapshots; they never hold registry locks
//! - Draining is graceful: out of the ring first, removed once idle

pub mod backend;
pub mod registry;

pub use backend::{Backend, BackendId, BackendSnapshot, InFlightGuard};
pub use registry::{Registration, Registry, RegistryError, RegistryEvent};
