//! Active health checking.
//!
//! # Responsibilities
//! - Run one probe worker per backend, each on its own schedule
//! - Start and stop workers as backends join and leave the registry
//! - Serve fast-probe requests from the forwarding path
//! - Feed probe outcomes into the registry's hysteresis

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::HealthCheckConfig;
use crate::health::state::ProbeOutcome;
use crate::load_balancer::backend::BackendId;
use crate::load_balancer::registry::{Registry, RegistryEvent};

/// Why a probe did not count as a success.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe request failed: {0}")]
    Request(String),

    #[error("probe returned non-success status {0}")]
    Status(StatusCode),
}

/// HTTP GET against the configured health path.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
    path: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(config: &HealthCheckConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeout()));
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self {
            client,
            path: config.path.clone(),
            timeout: config.timeout(),
        }
    }

    /// Probe once. Succeeds only on a 2xx within the timeout.
    pub async fn check(&self, addr: SocketAddr) -> Result<(), ProbeFailure> {
        let request = Request::builder()
            .method("GET")
            .uri(format!("http://{}{}", addr, self.path))
            .header("user-agent", "affinity-proxy-health-check")
            .body(Body::empty())
            .map_err(|e| ProbeFailure::Request(e.to_string()))?;

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(ProbeFailure::Status(response.status())),
            Ok(Err(e)) => Err(ProbeFailure::Request(e.to_string())),
            Err(_) => Err(ProbeFailure::Timeout(self.timeout)),
        }
    }
}

struct Worker {
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Supervises per-backend probe workers.
pub struct HealthProber {
    registry: Arc<Registry>,
    probe: HttpProbe,
    interval: Duration,
    triggers: mpsc::UnboundedReceiver<BackendId>,
}

impl HealthProber {
    pub fn new(
        registry: Arc<Registry>,
        config: &HealthCheckConfig,
        triggers: mpsc::UnboundedReceiver<BackendId>,
    ) -> Self {
        Self {
            registry,
            probe: HttpProbe::new(config),
            interval: config.interval(),
            triggers,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let HealthProber {
            registry,
            probe,
            interval,
            mut triggers,
        } = self;

        // Subscribe before the initial scan so no registration is missed.
        let mut membership = registry.subscribe();
        let mut workers: HashMap<BackendId, Worker> = HashMap::new();
        for id in registry.ids() {
            spawn_worker(&mut workers, &registry, &probe, interval, id);
        }

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            backends = workers.len(),
            "Health prober starting"
        );

        loop {
            tokio::select! {
                Some(id) = triggers.recv() => {
                    if let Some(worker) = workers.get(&id) {
                        worker.wake.notify_one();
                    }
                }
                event = membership.recv() => match event {
                    Ok(RegistryEvent::Added(id)) => {
                        spawn_worker(&mut workers, &registry, &probe, interval, id);
                    }
                    Ok(RegistryEvent::Removed(id)) => {
                        if let Some(worker) = workers.remove(&id) {
                            worker.task.abort();
                            tracing::debug!(backend = %id, "Probe worker stopped");
                        }
                    }
                    Ok(RegistryEvent::HealthChanged { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Prober lagged behind registry events, resyncing");
                        resync(&mut workers, &registry, &probe, interval);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Health prober received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        for (_, worker) in workers.drain() {
            worker.task.abort();
        }
    }
}

fn spawn_worker(
    workers: &mut HashMap<BackendId, Worker>,
    registry: &Arc<Registry>,
    probe: &HttpProbe,
    interval: Duration,
    id: BackendId,
) {
    if workers.contains_key(&id) {
        return;
    }
    let wake = Arc::new(Notify::new());
    let task = tokio::spawn(probe_loop(
        registry.clone(),
        probe.clone(),
        interval,
        id.clone(),
        wake.clone(),
    ));
    tracing::debug!(backend = %id, "Probe worker started");
    workers.insert(id, Worker { wake, task });
}

fn resync(workers: &mut HashMap<BackendId, Worker>, registry: &Arc<Registry>, probe: &HttpProbe, interval: Duration) {
    let current = registry.ids();
    workers.retain(|id, worker| {
        let keep = current.contains(id);
        if !keep {
            worker.task.abort();
        }
        keep
    });
    for id in current {
        spawn_worker(workers, registry, probe, interval, id);
    }
}

/// Up to 10% of the interval, so workers drift apart instead of probing in lockstep.
fn jitter(interval: Duration) -> Duration {
    let max = interval.as_millis() as u64 / 10;
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

async fn probe_loop(registry: Arc<Registry>, probe: HttpProbe, interval: Duration, id: BackendId, wake: Arc<Notify>) {
    let mut next = Instant::now();
    loop {
        tokio::select! {
            _ = time::sleep_until(next) => {}
            _ = wake.notified() => {
                tracing::debug!(backend = %id, "Running fast probe");
            }
        }

        let Some(backend) = registry.get(&id) else {
            break;
        };

        let outcome = match probe.check(backend.addr).await {
            Ok(()) => ProbeOutcome::Success,
            Err(e) => {
                tracing::debug!(backend = %id, address = %backend.addr, error = %e, "Health check failed");
                ProbeOutcome::Failure
            }
        };

        if registry.record_probe(&id, outcome).is_err() {
            break;
        }
        next = Instant::now() + interval + jitter(interval);
    }
}
