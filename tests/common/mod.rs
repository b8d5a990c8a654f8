//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use affinity_proxy::config::{BackendConfig, KeySource, ProxyConfig};
use affinity_proxy::http::{Forwarder, HttpServer};
use affinity_proxy::lifecycle::Shutdown;
use affinity_proxy::load_balancer::registry::Registry;
use affinity_proxy::observability::RecordingEventSink;
use affinity_proxy::reconciler::{RecordingProvisioner, ReconcilerStatus};
use affinity_proxy::routing::AffinityRouter;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{any, get};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};

/// Header the test proxies take the session key from.
pub const SESSION_HEADER: &str = "x-session";

#[derive(Clone)]
struct MockState {
    name: &'static str,
    hits: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
}

/// An axum backend on an ephemeral port.
pub struct MockBackend {
    pub name: &'static str,
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
    stop: Option<oneshot::Sender<()>>,
}

impl MockBackend {
    /// Requests served, health checks excluded.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Whether `/health` answers 200 or 500.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Stop accepting connections; later connects are refused.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn health(State(state): State<MockState>) -> StatusCode {
    if state.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn hello(State(state): State<MockState>) -> &'static str {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.name
}

async fn slow(State(state): State<MockState>) -> &'static str {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;
    state.name
}

async fn error(State(state): State<MockState>) -> (StatusCode, &'static str) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "backend error")
}

async fn echo_headers(State(state): State<MockState>, headers: HeaderMap) -> Json<HashMap<String, String>> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    Json(
        headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect(),
    )
}

pub async fn spawn_backend(name: &'static str) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let healthy = Arc::new(AtomicBool::new(true));
    let state = MockState {
        name,
        hits: hits.clone(),
        healthy: healthy.clone(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/slow", any(slow))
        .route("/error", any(error))
        .route("/echo-headers", any(echo_headers))
        .fallback(hello)
        .with_state(state);

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stopped.await;
            })
            .await;
    });

    MockBackend {
        name,
        addr,
        hits,
        healthy,
        stop: Some(stop),
    }
}

/// An address nothing listens on.
pub fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Config with header affinity and every background loop off.
pub fn base_config(backends: &[(&str, SocketAddr)]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.backends = backends
        .iter()
        .map(|(id, addr)| BackendConfig {
            id: id.to_string(),
            address: addr.to_string(),
        })
        .collect();
    config.affinity.key_source = KeySource::Header(SESSION_HEADER.into());
    config.affinity.vnodes_per_backend = 64;
    config.health_check.enabled = false;
    config.capacity.enabled = false;
    config.observability.metrics_enabled = false;
    config.timeouts.request_ms = 2_000;
    config.timeouts.connect_ms = 500;
    config
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub router: AffinityRouter,
    pub forwarder: Arc<Forwarder>,
    pub reconciler: Option<watch::Receiver<ReconcilerStatus>>,
    pub events: Arc<RecordingEventSink>,
    pub provisioner: Arc<RecordingProvisioner>,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// A session value whose failover order starts with `wanted`.
    pub fn session_for(&self, wanted: &[&str]) -> String {
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        for i in 0..100_000 {
            let value = format!("session-{}", i);
            let mut headers = HeaderMap::new();
            headers.insert(SESSION_HEADER, value.parse().unwrap());
            let key = self.forwarder.session_key(&headers, peer);
            let candidates = self.router.candidates(&key, wanted.len());
            if candidates.iter().map(|b| b.id.as_str()).eq(wanted.iter().copied()) {
                return value;
            }
        }
        panic!("no session routes to {:?}", wanted);
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let events = RecordingEventSink::new();
    let provisioner = RecordingProvisioner::new();
    let server = HttpServer::with_parts(config, provisioner.clone(), events.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let proxy = TestProxy {
        addr,
        registry: server.registry().clone(),
        router: server.router().clone(),
        forwarder: server.forwarder().clone(),
        reconciler: server.reconciler_status(),
        events,
        provisioner,
        shutdown: shutdown.clone(),
    };

    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });
    proxy
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Poll `condition` every 20ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
