//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track in-flight requests (for draining)
//! - Hold the per-backend health record behind its own lock

use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::Notify;

use crate::health::state::{HealthRecord, HealthState};

/// Stable backend identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BackendId(Arc<str>);

impl BackendId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Stable identifier.
    pub id: BackendId,
    /// The address of the backend.
    pub addr: SocketAddr,
    health: Mutex<HealthRecord>,
    in_flight: AtomicUsize,
    idle: Notify,
    // Set once the registry no longer holds this entry.
    retired: AtomicBool,
}

impl Backend {
    /// Create a new backend in the given initial state.
    pub fn new(id: BackendId, addr: SocketAddr, initial: HealthState) -> Self {
        Self {
            id,
            addr,
            health: Mutex::new(HealthRecord::new(initial)),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            retired: AtomicBool::new(false),
        }
    }

    /// Lock the health record. A poisoned lock still yields the record.
    pub(crate) fn health_mut(&self) -> MutexGuard<'_, HealthRecord> {
        self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn health(&self) -> HealthState {
        self.health_mut().state
    }

    /// Number of requests currently forwarded to this backend.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Count a request against this backend until the guard is dropped.
    pub fn begin_request(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            backend: self.clone(),
        }
    }

    /// Wait until no requests are in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Mark this entry as replaced or removed. It never rejoins the ring.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Immutable view for readers.
    pub fn snapshot(&self) -> BackendSnapshot {
        let record = self.health_mut().clone();
        BackendSnapshot {
            id: self.id.clone(),
            address: self.addr,
            health: record.state,
            consecutive_failures: record.consecutive_failures,
            consecutive_successes: record.consecutive_successes,
            last_checked_at: record.last_checked_at,
            in_flight: self.in_flight(),
        }
    }

    fn end_request(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Point-in-time copy of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub id: BackendId,
    pub address: SocketAddr,
    pub health: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_checked_at: Option<SystemTime>,
    pub in_flight: usize,
}

/// A RAII guard that manages the in-flight count.
#[derive(Debug)]
pub struct InFlightGuard {
    backend: Arc<Backend>,
}

impl InFlightGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for InFlightGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.backend.end_request();
    }
}
