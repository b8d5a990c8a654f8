//! Backend health state machine.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from load balancing
//! - Draining: excluded from new traffic, finishing in-flight requests
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= failure_threshold
//! Unhealthy → Healthy: consecutive successes >= success_threshold
//! Draining: only entered/left by operator action, never by a probe
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - A success resets the failure streak and vice versa
//! - Counters are not reset on transition; the opposite streak starts from zero anyway

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

/// Health class of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Draining,
}

impl HealthState {
    /// Only healthy backends take new traffic.
    pub fn is_routable(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Draining => "draining",
        };
        f.write_str(s)
    }
}

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

/// Hysteresis thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// N: failures needed to leave Healthy.
    pub failure: u32,
    /// M: successes needed to leave Unhealthy.
    pub success: u32,
}

impl Thresholds {
    pub fn new(failure: u32, success: u32) -> Self {
        Self {
            failure: failure.max(1),
            success: success.max(1),
        }
    }
}

/// A state change produced by a probe or operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
}

impl Transition {
    /// Did the backend enter or leave the routable set?
    pub fn changes_routability(&self) -> bool {
        self.from.is_routable() != self.to.is_routable()
    }
}

/// Mutable health bookkeeping for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_checked_at: Option<SystemTime>,
}

impl HealthRecord {
    pub fn new(state: HealthState) -> Self {
        Self {
            state,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_checked_at: None,
        }
    }

    /// Apply one probe outcome. Returns the transition, if any.
    pub fn observe(&mut self, outcome: ProbeOutcome, thresholds: Thresholds, at: SystemTime) -> Option<Transition> {
        self.last_checked_at = Some(at);
        match outcome {
            ProbeOutcome::Success => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                if self.state == HealthState::Unhealthy && self.consecutive_successes >= thresholds.success {
                    return self.transition_to(HealthState::Healthy);
                }
            }
            ProbeOutcome::Failure => {
                self.consecutive_successes = 0;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.state == HealthState::Healthy && self.consecutive_failures >= thresholds.failure {
                    return self.transition_to(HealthState::Unhealthy);
                }
            }
        }
        None
    }

    /// Force a state. Returns the transition if the state actually changed.
    pub fn transition_to(&mut self, to: HealthState) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        Some(Transition { from, to })
    }
}
