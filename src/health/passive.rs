//! Passive health signals (failure detection from live traffic).
//!
//! # Responsibilities
//! - Let the forwarding path report a failed backend
//! - Ask the active prober for an immediate out-of-cycle probe
//!
//! # Design Decisions
//! - Traffic never changes health state directly; it only triggers a probe,
//!   so hysteresis stays the single source of truth
//! - Unbounded, non-blocking send: the request path never waits on the prober

use tokio::sync::mpsc;

use crate::load_balancer::backend::BackendId;

/// Handle used to request fast probes.
#[derive(Debug, Clone)]
pub struct ProbeTrigger {
    tx: Option<mpsc::UnboundedSender<BackendId>>,
}

impl ProbeTrigger {
    /// Create a trigger and the receiver the prober listens on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BackendId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A trigger that drops every request (active checks disabled).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Request an immediate probe of `id`.
    pub fn fast_probe(&self, id: &BackendId) {
        if let Some(tx) = &self.tx {
            if tx.send(id.clone()).is_err() {
                tracing::debug!(backend = %id, "Prober not running, fast probe dropped");
            } else {
                tracing::debug!(backend = %id, "Fast probe requested");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_requests() {
        let (trigger, mut rx) = ProbeTrigger::channel();
        trigger.fast_probe(&"a".into());
        assert_eq!(rx.recv().await, Some("a".into()));
    }

    #[test]
    fn disabled_is_silent() {
        ProbeTrigger::disabled().fast_probe(&"a".into());
    }
}
