//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (one deadline for the whole request, retries included)
//!     → On forwarding failure: retries.rs (idempotent? retry once on the next backend)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every forwarded request has a deadline
//! - Retries only for idempotent requests (RFC 9110)
//! - A deadline expiry is final and never retried

pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
pub use timeouts::{Deadline, DeadlineExceeded};
