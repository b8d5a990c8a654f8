//! External provisioner interface.
//!
//! # Responsibilities
//! - Request replacement capacity from whatever launches instances
//! - Return an opaque handle for correlation in logs
//!
//! # Design Decisions
//! - Object safe (`BoxFuture`) so the implementation is chosen from config
//! - The reconciler never inspects provisioning internals; a new instance
//!   joins by registering through the admin API like any other backend

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{ProvisionerConfig, ProvisionerKind};

/// Why capacity is being requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplacementReason {
    pub healthy: usize,
    pub min_healthy: usize,
    pub desired_capacity: usize,
    pub attempt: u32,
}

impl fmt::Display for ReplacementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "healthy {} below minimum {} (desired {}, attempt {})",
            self.healthy, self.min_healthy, self.desired_capacity, self.attempt
        )
    }
}

/// Opaque identifier for an in-progress provisioning request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisioningHandle(pub String);

impl fmt::Display for ProvisioningHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioner request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provisioner rejected request with status {0}")]
    Rejected(u16),

    #[error("provisioner misconfigured: {0}")]
    Config(String),
}

/// Anything that can launch a replacement backend.
pub trait Provisioner: Send + Sync + fmt::Debug {
    fn request_replacement(&self, reason: ReplacementReason) -> BoxFuture<'static, Result<ProvisioningHandle, ProvisionError>>;
}

/// Only records requests in the log. For setups where an outer system
/// (an autoscaling group, an operator) watches the event stream instead.
#[derive(Debug, Default)]
pub struct LogProvisioner {
    counter: AtomicU64,
}

impl Provisioner for LogProvisioner {
    fn request_replacement(&self, reason: ReplacementReason) -> BoxFuture<'static, Result<ProvisioningHandle, ProvisionError>> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = ProvisioningHandle(format!("log-{}", n));
        tracing::warn!(handle = %handle, reason = %reason, "Replacement requested (log-only provisioner)");
        futures_util::future::ready(Ok(handle)).boxed()
    }
}

#[derive(Debug, Serialize)]
struct WebhookRequest<'a> {
    request_id: Uuid,
    reason: &'a ReplacementReason,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    handle: Option<String>,
}

/// POSTs replacement requests as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookProvisioner {
    client: reqwest::Client,
    url: String,
}

impl WebhookProvisioner {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

impl Provisioner for WebhookProvisioner {
    fn request_replacement(&self, reason: ReplacementReason) -> BoxFuture<'static, Result<ProvisioningHandle, ProvisionError>> {
        let client = self.client.clone();
        let url = self.url.clone();
        async move {
            let request_id = Uuid::new_v4();
            let response = client
                .post(&url)
                .json(&WebhookRequest { request_id, reason: &reason })
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ProvisionError::Rejected(status.as_u16()));
            }

            // The handle is optional; fall back to our own request id.
            let handle = response
                .json::<WebhookResponse>()
                .await
                .ok()
                .and_then(|r| r.handle)
                .unwrap_or_else(|| request_id.to_string());
            Ok(ProvisioningHandle(handle))
        }
        .boxed()
    }
}

/// Build the provisioner selected in config.
pub fn from_config(config: &ProvisionerConfig) -> Result<Arc<dyn Provisioner>, ProvisionError> {
    match config.kind {
        ProvisionerKind::Log => Ok(Arc::new(LogProvisioner::default())),
        ProvisionerKind::Webhook => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| ProvisionError::Config("webhook provisioner needs a url".into()))?;
            Ok(Arc::new(WebhookProvisioner::new(url, Duration::from_millis(config.timeout_ms))?))
        }
    }
}

/// Remembers every request and answers immediately.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct RecordingProvisioner {
    requests: std::sync::Mutex<Vec<ReplacementReason>>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingProvisioner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<ReplacementReason> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Provisioner for RecordingProvisioner {
    fn request_replacement(&self, reason: ReplacementReason) -> BoxFuture<'static, Result<ProvisioningHandle, ProvisionError>> {
        let n = match self.requests.lock() {
            Ok(mut requests) => {
                requests.push(reason);
                requests.len()
            }
            Err(_) => 0,
        };
        futures_util::future::ready(Ok(ProvisioningHandle(format!("recorded-{}", n)))).boxed()
    }
}
