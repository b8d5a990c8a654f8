//! Capacity state machine.
//!
//! # States
//! ```text
//! AtCapacity ──healthy < min──▶ BelowCapacity ──replacement issued──▶ Replacing
//!     ▲                              │                                 │   │
//!     └──────healthy >= min──────────┴─────────healthy >= min──────────┘   │
//!                                                   grace period expired ──┘ (re-issue)
//! ```

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityState {
    AtCapacity,
    BelowCapacity,
    Replacing,
}

impl fmt::Display for CapacityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapacityState::AtCapacity => "at_capacity",
            CapacityState::BelowCapacity => "below_capacity",
            CapacityState::Replacing => "replacing",
        };
        f.write_str(s)
    }
}

/// Published view of the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcilerStatus {
    pub state: CapacityState,
    pub healthy: usize,
    pub min_healthy: usize,
    pub desired_capacity: usize,
    /// Issuance rounds in the current replacement episode.
    pub attempts: u32,
    /// Replacement requests issued since startup.
    pub replacements_issued: u64,
}
