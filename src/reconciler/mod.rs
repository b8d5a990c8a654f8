//! Capacity reconciliation (control loop).
//!
//! # Data Flow
//! ```text
//! Registry events / periodic tick
//!     → Reconciler::step (compare healthy count with min_healthy)
//!     → state.rs (AtCapacity / BelowCapacity / Replacing)
//!     → provisioner.rs (fire-and-forget replacement request)
//!     → watch channel (status for the admin API)
//! ```
//!
//! # Design Decisions
//! - Never blocks on the provisioner; requests run as detached tasks
//! - A replacement that does not produce a healthy backend within the grace
//!   period is treated as lost and re-issued
//! - Never removes backends; it only asks for more

pub mod provisioner;
pub mod state;

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::CapacityConfig;
use crate::load_balancer::registry::Registry;
use crate::observability::events::{Event, EventSink};

pub use provisioner::{
    LogProvisioner, ProvisionError, Provisioner, ProvisioningHandle, ReplacementReason, WebhookProvisioner,
};
#[cfg(any(test, feature = "test-util"))]
pub use provisioner::RecordingProvisioner;
pub use state::{CapacityState, ReconcilerStatus};

/// Keeps the healthy backend count at or above `min_healthy`.
pub struct Reconciler {
    registry: Arc<Registry>,
    provisioner: Arc<dyn Provisioner>,
    events: Arc<dyn EventSink>,
    config: CapacityConfig,
    state: CapacityState,
    replacing_since: Option<Instant>,
    attempts: u32,
    replacements_issued: u64,
    status: watch::Sender<ReconcilerStatus>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<Registry>,
        provisioner: Arc<dyn Provisioner>,
        events: Arc<dyn EventSink>,
        config: CapacityConfig,
    ) -> Self {
        let (status, _) = watch::channel(ReconcilerStatus {
            state: CapacityState::AtCapacity,
            healthy: registry.healthy_count(),
            min_healthy: config.min_healthy,
            desired_capacity: config.desired_capacity,
            attempts: 0,
            replacements_issued: 0,
        });
        Self {
            registry,
            provisioner,
            events,
            config,
            state: CapacityState::AtCapacity,
            replacing_since: None,
            attempts: 0,
            replacements_issued: 0,
            status,
        }
    }

    pub fn state(&self) -> CapacityState {
        self.state
    }

    /// Follow the reconciler's published status.
    pub fn status(&self) -> watch::Receiver<ReconcilerStatus> {
        self.status.subscribe()
    }

    /// Evaluate once at `now`.
    pub fn step(&mut self, now: Instant) {
        let healthy = self.registry.healthy_count();
        let min = self.config.min_healthy;

        loop {
            match self.state {
                CapacityState::AtCapacity => {
                    if healthy < min {
                        self.transition(CapacityState::BelowCapacity, healthy);
                        continue;
                    }
                }
                CapacityState::BelowCapacity => {
                    if healthy >= min {
                        self.transition(CapacityState::AtCapacity, healthy);
                    } else {
                        self.attempts = 1;
                        self.issue(now, healthy);
                        self.transition(CapacityState::Replacing, healthy);
                    }
                }
                CapacityState::Replacing => {
                    if healthy >= min {
                        tracing::info!(attempts = self.attempts, healthy, "Capacity restored");
                        self.attempts = 0;
                        self.replacing_since = None;
                        self.transition(CapacityState::AtCapacity, healthy);
                    } else if let Some(since) = self.replacing_since {
                        let waited = now.saturating_duration_since(since);
                        if waited >= self.config.grace_period() {
                            self.events.emit(Event::ProvisioningTimeout {
                                attempt: self.attempts,
                                waited_ms: waited.as_millis() as u64,
                            });
                            self.attempts += 1;
                            self.issue(now, healthy);
                        }
                    }
                }
            }
            break;
        }

        self.publish(healthy);
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut changes = self.registry.subscribe();
        let mut ticker = time::interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            min_healthy = self.config.min_healthy,
            desired_capacity = self.config.desired_capacity,
            grace_period_ms = self.config.grace_period_ms,
            "Reconciler starting"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.step(Instant::now()),
                change = changes.recv() => match change {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => self.step(Instant::now()),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn issue(&mut self, now: Instant, healthy: usize) {
        let target = self.config.desired_capacity.max(self.config.min_healthy);
        let count = target.saturating_sub(healthy).max(1);
        let reason = ReplacementReason {
            healthy,
            min_healthy: self.config.min_healthy,
            desired_capacity: self.config.desired_capacity,
            attempt: self.attempts,
        };

        self.events.emit(Event::ReplacementRequested {
            count,
            attempt: self.attempts,
            healthy,
        });

        for _ in 0..count {
            let request = self.provisioner.request_replacement(reason.clone());
            let events = self.events.clone();
            tokio::spawn(async move {
                match request.await {
                    Ok(handle) => tracing::info!(handle = %handle, "Replacement accepted by provisioner"),
                    Err(e) => events.emit(Event::ProvisioningFailed { error: e.to_string() }),
                }
            });
        }

        self.replacements_issued += count as u64;
        self.replacing_since = Some(now);
    }

    fn transition(&mut self, to: CapacityState, healthy: usize) {
        let from = self.state;
        self.state = to;
        self.events.emit(Event::CapacityTransition { from, to, healthy });
    }

    fn publish(&self, healthy: usize) {
        self.status.send_replace(ReconcilerStatus {
            state: self.state,
            healthy,
            min_healthy: self.config.min_healthy,
            desired_capacity: self.config.desired_capacity,
            attempts: self.attempts,
            replacements_issued: self.replacements_issued,
        });
    }
}
