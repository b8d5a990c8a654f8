//! Affinity routing.
//!
//! # Responsibilities
//! - Map a session key to a healthy backend via the hash ring
//! - Offer the next clockwise backend for failover
//! - Report an explicit `NoAvailableBackend` rather than a silent default
//!
//! # Design Decisions
//! - Stateless: everything lives in the registry's ring
//! - Deterministic: same key and same healthy set always give the same backend

use std::sync::Arc;

use thiserror::Error;

use crate::load_balancer::backend::{Backend, BackendId};
use crate::load_balancer::registry::Registry;
use crate::routing::session::SessionKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no available backend")]
    NoAvailableBackend,
}

/// Routes session keys to backends.
#[derive(Debug, Clone)]
pub struct AffinityRouter {
    registry: Arc<Registry>,
}

impl AffinityRouter {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Healthy backend owning this key.
    pub fn route(&self, key: &SessionKey) -> Result<Arc<Backend>, RouteError> {
        self.registry
            .ring()
            .lookup(key.ring_hash())
            .cloned()
            .ok_or(RouteError::NoAvailableBackend)
    }

    /// Next healthy backend clockwise that is not in `excluded`.
    pub fn route_excluding(&self, key: &SessionKey, excluded: &[BackendId]) -> Result<Arc<Backend>, RouteError> {
        self.registry
            .ring()
            .lookup_excluding(key.ring_hash(), excluded)
            .cloned()
            .ok_or(RouteError::NoAvailableBackend)
    }

    /// Whether `backend` is still this exact entry on the ring.
    pub fn is_current(&self, backend: &Arc<Backend>) -> bool {
        self.registry
            .ring()
            .member(&backend.id)
            .is_some_and(|b| Arc::ptr_eq(b, backend))
    }

    /// The first `n` distinct healthy backends for this key, in failover order.
    pub fn candidates(&self, key: &SessionKey, n: usize) -> Vec<Arc<Backend>> {
        self.registry.ring().successors(key.ring_hash(), n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::{HealthState, ProbeOutcome, Thresholds};
    use crate::observability::events::RecordingEventSink;

    fn router_with(ids: &[&str]) -> AffinityRouter {
        let registry = Arc::new(Registry::new(Thresholds::new(3, 2), 64, RecordingEventSink::new()));
        for (i, id) in ids.iter().enumerate() {
            registry.register(
                (*id).into(),
                format!("127.0.0.1:{}", 7000 + i).parse().unwrap(),
                HealthState::Healthy,
            );
        }
        AffinityRouter::new(registry)
    }

    #[test]
    fn no_healthy_backend() {
        let router = router_with(&[]);
        assert_eq!(
            router.route(&SessionKey::new("k")).unwrap_err(),
            RouteError::NoAvailableBackend
        );

        let router = router_with(&["a"]);
        router.registry().set_health(&"a".into(), HealthState::Unhealthy).unwrap();
        assert!(router.route(&SessionKey::new("k")).is_err());
    }

    #[test]
    fn repeated_routes_are_stable() {
        let router = router_with(&["a", "b", "c"]);
        for i in 0..200 {
            let key = SessionKey::new(format!("10.0.{}.1", i));
            let first = router.route(&key).unwrap().id.clone();
            for _ in 0..5 {
                assert_eq!(router.route(&key).unwrap().id, first);
            }
        }
    }

    #[test]
    fn two_backends_degrade_to_failover() {
        let router = router_with(&["primary", "secondary"]);
        let key = SessionKey::new("client");
        let owner = router.route(&key).unwrap().id.clone();
        let other = router.route_excluding(&key, &[owner.clone()]).unwrap().id.clone();
        assert_ne!(owner, other);

        for _ in 0..3 {
            router.registry().record_probe(&owner, ProbeOutcome::Failure).unwrap();
        }
        assert_eq!(router.route(&key).unwrap().id, other);
    }

    #[test]
    fn drained_or_replaced_backend_is_not_current() {
        let router = router_with(&["a", "b"]);
        let a = router.registry().get(&"a".into()).unwrap();
        let b = router.registry().get(&"b".into()).unwrap();
        assert!(router.is_current(&a));

        router.registry().drain(&"a".into()).unwrap();
        assert!(!router.is_current(&a));

        router
            .registry()
            .register("b".into(), "127.0.0.1:7999".parse().unwrap(), HealthState::Healthy);
        assert!(!router.is_current(&b));
        assert!(router.is_current(&router.registry().get(&"b".into()).unwrap()));
    }

    #[test]
    fn draining_backend_gets_no_new_routes() {
        let router = router_with(&["a", "b", "c"]);
        router.registry().drain(&"b".into()).unwrap();
        for i in 0..500 {
            let key = SessionKey::new(format!("user-{}", i));
            assert_ne!(router.route(&key).unwrap().id.as_str(), "b");
        }
    }
}
