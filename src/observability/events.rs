//! Structured events for an external collector.
//!
//! # Responsibilities
//! - Describe health transitions, routing failures and reconciliation actions
//! - Deliver them to a pluggable sink
//!
//! # Design Decisions
//! - The sink is passed explicitly to every producer (no global emitter)
//! - Default sink writes `tracing` events under a dedicated target and
//!   updates the matching Prometheus series

use crate::health::state::HealthState;
use crate::load_balancer::backend::BackendId;
use crate::observability::metrics;
use crate::reconciler::state::CapacityState;

/// Tracing target used for every event.
pub const EVENT_TARGET: &str = "affinity_proxy::events";

/// Why a request could not be served by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingFailureKind {
    NoAvailableBackend,
    ForwardingFailure,
    DeadlineExceeded,
}

impl RoutingFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingFailureKind::NoAvailableBackend => "no_available_backend",
            RoutingFailureKind::ForwardingFailure => "forwarding_failure",
            RoutingFailureKind::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Observable occurrences.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    HealthTransition {
        backend: BackendId,
        from: HealthState,
        to: HealthState,
    },
    RoutingFailure {
        kind: RoutingFailureKind,
        backend: Option<BackendId>,
        request_id: String,
    },
    ForwardRetried {
        failed: BackendId,
        next: BackendId,
        request_id: String,
    },
    CapacityTransition {
        from: CapacityState,
        to: CapacityState,
        healthy: usize,
    },
    ReplacementRequested {
        count: usize,
        attempt: u32,
        healthy: usize,
    },
    ProvisioningTimeout {
        attempt: u32,
        waited_ms: u64,
    },
    ProvisioningFailed {
        error: String,
    },
}

/// Receiver of structured events.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    fn emit(&self, event: Event);
}

/// Logs events via `tracing` and records metrics.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        match event {
            Event::HealthTransition { backend, from, to } => {
                tracing::warn!(
                    target: EVENT_TARGET,
                    event = "health_transition",
                    backend = %backend,
                    from = %from,
                    to = %to,
                    "Backend health changed"
                );
                metrics::record_health_transition(backend.as_str(), to);
                metrics::record_backend_health(backend.as_str(), to);
            }
            Event::RoutingFailure { kind, backend, request_id } => {
                tracing::warn!(
                    target: EVENT_TARGET,
                    event = "routing_failure",
                    kind = kind.as_str(),
                    backend = backend.as_ref().map(|b| b.as_str()).unwrap_or("none"),
                    request_id = %request_id,
                    "Request could not be served"
                );
                metrics::record_routing_failure(kind.as_str());
            }
            Event::ForwardRetried { failed, next, request_id } => {
                tracing::info!(
                    target: EVENT_TARGET,
                    event = "forward_retried",
                    failed = %failed,
                    next = %next,
                    request_id = %request_id,
                    "Retrying idempotent request on next backend"
                );
                metrics::record_retry(failed.as_str());
            }
            Event::CapacityTransition { from, to, healthy } => {
                tracing::info!(
                    target: EVENT_TARGET,
                    event = "capacity_transition",
                    from = %from,
                    to = %to,
                    healthy,
                    "Reconciler state changed"
                );
            }
            Event::ReplacementRequested { count, attempt, healthy } => {
                tracing::warn!(
                    target: EVENT_TARGET,
                    event = "replacement_requested",
                    count,
                    attempt,
                    healthy,
                    "Requesting replacement capacity"
                );
                metrics::record_replacements(count);
            }
            Event::ProvisioningTimeout { attempt, waited_ms } => {
                tracing::error!(
                    target: EVENT_TARGET,
                    event = "provisioning_timeout",
                    attempt,
                    waited_ms,
                    "Replacement did not become healthy within grace period, escalating"
                );
                metrics::record_provisioning_timeout();
            }
            Event::ProvisioningFailed { error } => {
                tracing::error!(
                    target: EVENT_TARGET,
                    event = "provisioning_failed",
                    error = %error,
                    "Provisioner rejected replacement request"
                );
            }
        }
    }
}

/// Keeps every event in memory.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<Event>>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingEventSink {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
