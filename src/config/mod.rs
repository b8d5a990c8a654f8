//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → handed to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is read once; it never changes for the lifetime of the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AffinityConfig, BackendConfig, CapacityConfig, HealthCheckConfig, KeySource,
    ListenerConfig, LogFormat, ObservabilityConfig, ProvisionerConfig, ProvisionerKind,
    ProxyConfig, RetryConfig, TimeoutConfig,
};
