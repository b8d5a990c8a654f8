//! Backend registry.
//!
//! # Responsibilities
//! - Own the set of backends keyed by id
//! - Apply health updates atomically per backend
//! - Keep the affinity ring in step with the routable set
//! - Broadcast membership and health changes to the prober and reconciler
//!
//! # Design Decisions
//! - `DashMap` shards membership; each backend's health has its own lock
//! - The ring sits behind an `RwLock`; routing only takes the read side, and
//!   a transition holds the write side just long enough to move one backend's points
//! - Lock order is always: backend health lock, then ring lock
//! - Replaced or removed entries are retired before the ring is touched, and
//!   a transition only reinserts a backend that is not retired

use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::health::state::{HealthState, ProbeOutcome, Thresholds, Transition};
use crate::load_balancer::backend::{Backend, BackendId, BackendSnapshot};
use crate::observability::events::{Event, EventSink};
use crate::observability::metrics;
use crate::routing::ring::HashRing;

/// Membership and health notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(BackendId),
    Removed(BackendId),
    HealthChanged { id: BackendId, transition: Transition },
}

/// Errors from registry operations that target a specific backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("backend not found: {0}")]
    NotFound(BackendId),
}

/// Outcome of `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
    Unchanged,
}

/// Shared registry of backends plus the affinity ring built from it.
#[derive(Debug)]
pub struct Registry {
    backends: DashMap<BackendId, Arc<Backend>>,
    ring: RwLock<HashRing>,
    thresholds: Thresholds,
    events: Arc<dyn EventSink>,
    notify: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    pub fn new(thresholds: Thresholds, vnodes_per_backend: usize, events: Arc<dyn EventSink>) -> Self {
        let (notify, _) = broadcast::channel(256);
        Self {
            backends: DashMap::new(),
            ring: RwLock::new(HashRing::new(vnodes_per_backend)),
            thresholds,
            events,
            notify,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Receive membership and health changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.notify.subscribe()
    }

    /// Add or update a backend by id.
    ///
    /// Same id and address is a no-op. A new address replaces the entry and
    /// starts over in `initial`.
    pub fn register(&self, id: BackendId, addr: SocketAddr, initial: HealthState) -> Registration {
        let backend = Arc::new(Backend::new(id.clone(), addr, initial));
        let outcome = match self.backends.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().addr == addr {
                    return Registration::Unchanged;
                }
                let previous = entry.insert(backend.clone());
                previous.retire();
                let mut ring = self.ring_write();
                ring.remove(&previous.id);
                if initial.is_routable() {
                    ring.insert(backend);
                }
                Registration::Replaced
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(backend.clone());
                if initial.is_routable() {
                    self.ring_write().insert(backend);
                }
                Registration::Added
            }
        };

        metrics::record_backend_health(id.as_str(), initial);
        tracing::info!(backend = %id, address = %addr, health = %initial, outcome = ?outcome, "Backend registered");
        let _ = self.notify.send(RegistryEvent::Added(id));
        outcome
    }

    /// Remove a backend. Absent ids are ignored.
    pub fn remove(&self, id: &BackendId) -> Option<BackendSnapshot> {
        let (_, backend) = self.backends.remove(id)?;
        backend.retire();
        {
            let mut ring = self.ring_write();
            if ring.member(id).is_some_and(|b| Arc::ptr_eq(b, &backend)) {
                ring.remove(id);
            }
        }
        tracing::info!(backend = %id, in_flight = backend.in_flight(), "Backend removed");
        let _ = self.notify.send(RegistryEvent::Removed(id.clone()));
        Some(backend.snapshot())
    }

    pub fn get(&self, id: &BackendId) -> Option<Arc<Backend>> {
        self.backends.get(id).map(|b| b.value().clone())
    }

    /// Copy of every backend, sorted by id.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        let backends: Vec<Arc<Backend>> = self.backends.iter().map(|b| b.value().clone()).collect();
        let mut out: Vec<BackendSnapshot> = backends.iter().map(|b| b.snapshot()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn ids(&self) -> Vec<BackendId> {
        self.backends.iter().map(|b| b.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Number of backends currently taking traffic.
    pub fn healthy_count(&self) -> usize {
        self.ring_read().len()
    }

    /// Set a backend's state directly.
    pub fn set_health(&self, id: &BackendId, health: HealthState) -> Result<Option<Transition>, RegistryError> {
        let backend = self.get(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let mut record = backend.health_mut();
        let transition = record.transition_to(health);
        if let Some(t) = transition {
            self.apply_transition(&backend, t);
        }
        Ok(transition)
    }

    /// Apply one probe outcome with hysteresis.
    pub fn record_probe(&self, id: &BackendId, outcome: ProbeOutcome) -> Result<Option<Transition>, RegistryError> {
        let backend = self.get(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let mut record = backend.health_mut();
        let transition = record.observe(outcome, self.thresholds, SystemTime::now());
        tracing::trace!(
            backend = %id,
            outcome = ?outcome,
            failures = record.consecutive_failures,
            successes = record.consecutive_successes,
            "Probe recorded"
        );
        if let Some(t) = transition {
            self.apply_transition(&backend, t);
        }
        Ok(transition)
    }

    /// Stop routing new requests to a backend.
    pub fn drain(&self, id: &BackendId) -> Result<Option<Transition>, RegistryError> {
        self.set_health(id, HealthState::Draining)
    }

    /// Drain a backend, wait for its in-flight requests, then remove it.
    pub async fn drain_and_remove(&self, id: &BackendId) -> Result<BackendSnapshot, RegistryError> {
        self.drain(id)?;
        let backend = self.get(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        tracing::info!(backend = %id, in_flight = backend.in_flight(), "Draining backend");
        backend.wait_idle().await;
        self.remove(id).ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Shared read access to the ring.
    pub fn ring(&self) -> RwLockReadGuard<'_, HashRing> {
        self.ring_read()
    }

    // Called with the backend's health lock held so that ring membership and
    // health state cannot be observed out of step for this backend.
    fn apply_transition(&self, backend: &Arc<Backend>, transition: Transition) {
        if transition.changes_routability() {
            if transition.to.is_routable() {
                // Checked under the ring lock: `register` and `remove` retire
                // the old entry before they take it.
                let mut ring = self.ring_write();
                if !backend.is_retired() {
                    ring.insert(backend.clone());
                }
            } else {
                let mut ring = self.ring_write();
                if ring.member(&backend.id).is_some_and(|b| Arc::ptr_eq(b, backend)) {
                    ring.remove(&backend.id);
                }
            }
        }
        self.events.emit(Event::HealthTransition {
            backend: backend.id.clone(),
            from: transition.from,
            to: transition.to,
        });
        let _ = self.notify.send(RegistryEvent::HealthChanged {
            id: backend.id.clone(),
            transition,
        });
    }

    fn ring_read(&self) -> RwLockReadGuard<'_, HashRing> {
        self.ring.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ring_write(&self) -> RwLockWriteGuard<'_, HashRing> {
        self.ring.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::events::RecordingEventSink;

    fn registry() -> (Registry, Arc<RecordingEventSink>) {
        let sink = RecordingEventSink::new();
        (Registry::new(Thresholds::new(3, 2), 32, sink.clone()), sink)
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn register_is_idempotent() {
        let (reg, _) = registry();
        assert_eq!(reg.register("a".into(), addr(1), HealthState::Healthy), Registration::Added);
        assert_eq!(reg.register("a".into(), addr(1), HealthState::Healthy), Registration::Unchanged);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.healthy_count(), 1);
    }

    #[test]
    fn register_with_new_address_replaces() {
        let (reg, _) = registry();
        reg.register("a".into(), addr(1), HealthState::Healthy);
        assert_eq!(reg.register("a".into(), addr(2), HealthState::Unhealthy), Registration::Replaced);
        assert_eq!(reg.get(&"a".into()).unwrap().addr, addr(2));
        assert_eq!(reg.healthy_count(), 0);
    }

    #[test]
    fn remove_absent_is_silent() {
        let (reg, _) = registry();
        assert!(reg.remove(&"ghost".into()).is_none());
        reg.register("a".into(), addr(1), HealthState::Healthy);
        assert!(reg.remove(&"a".into()).is_some());
        assert!(reg.is_empty());
        assert_eq!(reg.healthy_count(), 0);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let (reg, _) = registry();
        reg.register("b".into(), addr(2), HealthState::Healthy);
        reg.register("a".into(), addr(1), HealthState::Unhealthy);
        let snap = reg.snapshot();
        reg.set_health(&"a".into(), HealthState::Healthy).unwrap();

        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id.as_str(), "a");
        assert_eq!(snap[0].health, HealthState::Unhealthy);
    }

    #[test]
    fn probes_drive_ring_membership() {
        let (reg, sink) = registry();
        let id: BackendId = "a".into();
        reg.register(id.clone(), addr(1), HealthState::Healthy);

        reg.record_probe(&id, ProbeOutcome::Failure).unwrap();
        reg.record_probe(&id, ProbeOutcome::Failure).unwrap();
        assert_eq!(reg.healthy_count(), 1);
        let t = reg.record_probe(&id, ProbeOutcome::Failure).unwrap();
        assert_eq!(t.map(|t| t.to), Some(HealthState::Unhealthy));
        assert_eq!(reg.healthy_count(), 0);

        reg.record_probe(&id, ProbeOutcome::Success).unwrap();
        assert_eq!(reg.healthy_count(), 0);
        reg.record_probe(&id, ProbeOutcome::Success).unwrap();
        assert_eq!(reg.healthy_count(), 1);

        let transitions: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::HealthTransition { .. }))
            .collect();
        assert_eq!(transitions.len(), 2);
    }

    #[test]
    fn set_health_same_state_is_noop() {
        let (reg, sink) = registry();
        reg.register("a".into(), addr(1), HealthState::Healthy);
        let generation = reg.ring().generation();
        assert_eq!(reg.set_health(&"a".into(), HealthState::Healthy).unwrap(), None);
        assert_eq!(reg.ring().generation(), generation);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn unknown_backend_errors() {
        let (reg, _) = registry();
        assert_eq!(
            reg.record_probe(&"x".into(), ProbeOutcome::Success),
            Err(RegistryError::NotFound("x".into()))
        );
    }

    // A probe that resolved the old entry can finish after `register` has
    // swapped in a new address; it must not bring the old address back.
    #[test]
    fn replaced_entry_stays_off_the_ring() {
        let (reg, _) = registry();
        let id: BackendId = "a".into();
        reg.register(id.clone(), addr(1), HealthState::Unhealthy);
        let stale = reg.get(&id).unwrap();

        reg.register(id.clone(), addr(2), HealthState::Unhealthy);
        assert!(stale.is_retired());
        reg.apply_transition(
            &stale,
            Transition {
                from: HealthState::Unhealthy,
                to: HealthState::Healthy,
            },
        );

        assert_eq!(reg.healthy_count(), 0);
        assert!(reg.ring().member(&id).is_none());

        reg.set_health(&id, HealthState::Healthy).unwrap();
        assert_eq!(reg.ring().member(&id).map(|b| b.addr), Some(addr(2)));
    }

    #[test]
    fn removed_entry_stays_off_the_ring() {
        let (reg, _) = registry();
        let id: BackendId = "a".into();
        reg.register(id.clone(), addr(1), HealthState::Unhealthy);
        let stale = reg.get(&id).unwrap();

        reg.remove(&id);
        reg.apply_transition(
            &stale,
            Transition {
                from: HealthState::Unhealthy,
                to: HealthState::Healthy,
            },
        );
        assert_eq!(reg.healthy_count(), 0);
    }

    #[test]
    fn registration_sets_health_gauge() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let (reg, _) = registry();

        ::metrics::with_local_recorder(&recorder, || {
            reg.register("a".into(), addr(1), HealthState::Healthy);
            reg.register("b".into(), addr(2), HealthState::Unhealthy);
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"proxy_backend_health{backend="a"} 1"#), "{}", rendered);
        assert!(rendered.contains(r#"proxy_backend_health{backend="b"} 0"#), "{}", rendered);
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let (reg, _) = registry();
        let mut rx = reg.subscribe();
        reg.register("a".into(), addr(1), HealthState::Healthy);
        reg.drain(&"a".into()).unwrap();
        reg.remove(&"a".into());

        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::Added("a".into()));
        assert!(matches!(rx.recv().await.unwrap(), RegistryEvent::HealthChanged { .. }));
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::Removed("a".into()));
    }
}
