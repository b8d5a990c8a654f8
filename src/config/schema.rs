//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Backends known at startup.
    pub backends: Vec<BackendConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Session affinity and hash ring settings.
    pub affinity: AffinityConfig,

    /// Capacity targets for the reconciler.
    pub capacity: CapacityConfig,

    /// External provisioner used to replace lost capacity.
    pub provisioner: ProvisionerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Static backend definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub id: String,

    /// Backend address (e.g., "10.0.1.12:80").
    pub address: String,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval per backend in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe.
    pub path: String,

    /// Consecutive failures before Healthy -> Unhealthy (N).
    pub failure_threshold: u32,

    /// Consecutive successes before Unhealthy -> Healthy (M).
    pub success_threshold: u32,

    /// Probe a backend immediately when a forward to it fails.
    pub fast_probe_on_failure: bool,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            timeout_ms: 5_000,
            path: "/health".to_string(),
            failure_threshold: 3,
            success_threshold: 2,
            fast_probe_on_failure: true,
        }
    }
}

/// Where the session key is taken from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum KeySource {
    /// Full client IP address.
    ClientIp,
    /// First three octets of an IPv4 client address (IPv6 uses the full address).
    IpHash,
    /// Value of the named request header.
    Header(String),
    /// Value of the named cookie.
    Cookie(String),
}

/// Session affinity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AffinityConfig {
    /// Session key source.
    pub key_source: KeySource,

    /// Use the first `X-Forwarded-For` entry as the client address.
    pub trust_forwarded_for: bool,

    /// Virtual points per backend on the hash ring.
    pub vnodes_per_backend: usize,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            key_source: KeySource::IpHash,
            trust_forwarded_for: false,
            vnodes_per_backend: 160,
        }
    }
}

/// Capacity targets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Enable the reconciler.
    pub enabled: bool,

    /// Minimum healthy backends before replacements are requested.
    pub min_healthy: usize,

    /// Healthy backends the reconciler restores to.
    pub desired_capacity: usize,

    /// Time a replacement may take before it is re-issued, in milliseconds.
    pub grace_period_ms: u64,

    /// Evaluation tick in milliseconds.
    pub reconcile_interval_ms: u64,
}

impl CapacityConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_healthy: 1,
            desired_capacity: 1,
            grace_period_ms: 300_000,
            reconcile_interval_ms: 1_000,
        }
    }
}

/// Provisioner backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerKind {
    /// Only log replacement requests.
    Log,
    /// POST replacement requests to a webhook.
    Webhook,
}

/// External provisioner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub kind: ProvisionerKind,

    /// Webhook URL (required for `webhook`).
    pub url: Option<String>,

    /// Webhook request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            kind: ProvisionerKind::Log,
            url: None,
            timeout_ms: 10_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Overall request deadline in milliseconds, retries included.
    pub request_ms: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 2_000,
            request_ms: 30_000,
            idle_secs: 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry idempotent requests once on forwarding failure.
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
