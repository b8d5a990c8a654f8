//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeout fits interval)
//! - Check capacity targets are consistent
//! - Detect duplicate backend ids and unparseable addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{KeySource, ProvisionerKind, ProxyConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: String, value: String },

    #[error("duplicate backend id: {0}")]
    DuplicateBackend(String),

    #[error("{0} must be at least 1")]
    ZeroValue(&'static str),

    #[error("health_check.timeout_ms ({timeout_ms}) exceeds interval_ms ({interval_ms})")]
    ProbeTimeoutTooLong { timeout_ms: u64, interval_ms: u64 },

    #[error("capacity.min_healthy ({min}) exceeds desired_capacity ({desired})")]
    CapacityInverted { min: usize, desired: usize },

    #[error("health_check.path must start with '/': {0}")]
    InvalidProbePath(String),

    #[error("affinity key source name must not be empty")]
    EmptyKeySourceName,

    #[error("provisioner.url is required for the webhook provisioner")]
    MissingWebhookUrl,

    #[error("provisioner.url is not a valid URL: {0}")]
    InvalidWebhookUrl(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if !seen.insert(backend.id.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.id.clone()));
        }
        check_address(&mut errors, &format!("backends.{}", backend.id), &backend.address);
    }

    let hc = &config.health_check;
    if hc.failure_threshold == 0 {
        errors.push(ValidationError::ZeroValue("health_check.failure_threshold"));
    }
    if hc.success_threshold == 0 {
        errors.push(ValidationError::ZeroValue("health_check.success_threshold"));
    }
    if hc.interval_ms == 0 {
        errors.push(ValidationError::ZeroValue("health_check.interval_ms"));
    }
    if hc.timeout_ms == 0 {
        errors.push(ValidationError::ZeroValue("health_check.timeout_ms"));
    } else if hc.timeout_ms > hc.interval_ms {
        errors.push(ValidationError::ProbeTimeoutTooLong {
            timeout_ms: hc.timeout_ms,
            interval_ms: hc.interval_ms,
        });
    }
    if !hc.path.starts_with('/') {
        errors.push(ValidationError::InvalidProbePath(hc.path.clone()));
    }

    if config.affinity.vnodes_per_backend == 0 {
        errors.push(ValidationError::ZeroValue("affinity.vnodes_per_backend"));
    }
    match &config.affinity.key_source {
        KeySource::Header(name) | KeySource::Cookie(name) if name.trim().is_empty() => {
            errors.push(ValidationError::EmptyKeySourceName);
        }
        _ => {}
    }

    let cap = &config.capacity;
    if cap.min_healthy > cap.desired_capacity {
        errors.push(ValidationError::CapacityInverted {
            min: cap.min_healthy,
            desired: cap.desired_capacity,
        });
    }
    if cap.reconcile_interval_ms == 0 {
        errors.push(ValidationError::ZeroValue("capacity.reconcile_interval_ms"));
    }
    if cap.grace_period_ms == 0 {
        errors.push(ValidationError::ZeroValue("capacity.grace_period_ms"));
    }

    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.request_ms"));
    }

    if config.provisioner.kind == ProvisionerKind::Webhook {
        match &config.provisioner.url {
            None => errors.push(ValidationError::MissingWebhookUrl),
            Some(raw) => {
                if url::Url::parse(raw).is_err() {
                    errors.push(ValidationError::InvalidWebhookUrl(raw.clone()));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}
