//! Timeout enforcement.
//!
//! # Responsibilities
//! - Carry one overall deadline through every step of a request
//! - Report the remaining budget to backends
//! - Cancel operations cleanly on expiry
//!
//! # Design Decisions
//! - Uses Tokio's timer, so paused-time tests drive it
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request deadline exceeded")]
pub struct DeadlineExceeded;

/// A fixed point in time by which a request must finish.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { at: Instant::now() + budget }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `fut`, giving up when the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        time::timeout_at(self.at, fut).await.map_err(|_| DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn remaining_shrinks() {
        let deadline = Deadline::after(Duration::from_millis(500));
        time::advance(Duration::from_millis(200)).await;
        assert_eq!(deadline.remaining(), Duration::from_millis(300));
        time::advance(Duration::from_millis(400)).await;
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let slow = time::sleep(Duration::from_secs(5));
        assert_eq!(deadline.run(slow).await, Err(DeadlineExceeded));

        let deadline = Deadline::after(Duration::from_millis(100));
        assert_eq!(deadline.run(async { 7 }).await, Ok(7));
    }
}
