//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, background tasks)
//!     → request.rs (request ID, forwarding headers)
//!     → forward.rs (session key → ring → backend, retry, deadline)
//!     → response.rs (strip hop-by-hop, stream body, map errors)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use forward::Forwarder;
pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
