//! Retry policy.
//!
//! # Responsibilities
//! - Decide whether a failed forward may be replayed
//! - Bound replays to a single extra attempt
//!
//! # Design Decisions
//! - Never retry POST/PATCH/CONNECT (non-idempotent)
//! - Only transport failures are retried; a 5xx from a backend is an answer

use axum::http::Method;

use crate::config::RetryConfig;

/// Total attempts for a retryable request.
pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    enabled: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self { enabled: config.enabled }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Whether requests with this method may be replayed on another backend.
    pub fn is_retryable(&self, method: &Method) -> bool {
        self.enabled && method.is_idempotent()
    }

    /// Attempts allowed for this method.
    pub fn max_attempts(&self, method: &Method) -> u32 {
        if self.is_retryable(method) {
            MAX_ATTEMPTS
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_methods_retry_once() {
        let policy = RetryPolicy::from_config(&RetryConfig { enabled: true });
        for method in [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE, Method::PUT, Method::DELETE] {
            assert!(policy.is_retryable(&method), "{method} should be retryable");
            assert_eq!(policy.max_attempts(&method), 2);
        }
    }

    #[test]
    fn unsafe_methods_never_retry() {
        let policy = RetryPolicy::from_config(&RetryConfig { enabled: true });
        for method in [Method::POST, Method::PATCH, Method::CONNECT] {
            assert!(!policy.is_retryable(&method));
            assert_eq!(policy.max_attempts(&method), 1);
        }
    }

    #[test]
    fn disabled_policy() {
        assert_eq!(RetryPolicy::disabled().max_attempts(&Method::GET), 1);
    }
}
