//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the registry, prober, reconciler and forwarder from config
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, body limit)
//! - Run background tasks and serve until shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin::{self, AdminState};
use crate::config::ProxyConfig;
use crate::health::active::HealthProber;
use crate::health::passive::ProbeTrigger;
use crate::health::state::{HealthState, Thresholds};
use crate::http::forward::Forwarder;
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::load_balancer::backend::BackendId;
use crate::load_balancer::registry::Registry;
use crate::observability::events::{EventSink, TracingEventSink};
use crate::reconciler::provisioner::{self, ProvisionError, Provisioner};
use crate::reconciler::{Reconciler, ReconcilerStatus};
use crate::routing::router::AffinityRouter;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<Forwarder>,
}

/// HTTP server for the load balancer.
pub struct HttpServer {
    config: ProxyConfig,
    registry: Arc<Registry>,
    forwarder: Arc<Forwarder>,
    prober: Option<HealthProber>,
    reconciler: Option<Reconciler>,
    reconciler_status: Option<watch::Receiver<ReconcilerStatus>>,
}

impl HttpServer {
    /// Create a server with the configured provisioner and the tracing event sink.
    pub fn new(config: ProxyConfig) -> Result<Self, ProvisionError> {
        let provisioner = provisioner::from_config(&config.provisioner)?;
        Ok(Self::with_parts(config, provisioner, Arc::new(TracingEventSink)))
    }

    /// Create a server with an explicit provisioner and event sink.
    pub fn with_parts(config: ProxyConfig, provisioner: Arc<dyn Provisioner>, events: Arc<dyn EventSink>) -> Self {
        let health = &config.health_check;
        let registry = Arc::new(Registry::new(
            Thresholds::new(health.failure_threshold, health.success_threshold),
            config.affinity.vnodes_per_backend,
            events.clone(),
        ));

        // Static backends are trusted until probes say otherwise.
        for backend in &config.backends {
            match backend.address.parse::<SocketAddr>() {
                Ok(addr) => {
                    registry.register(BackendId::new(&backend.id), addr, HealthState::Healthy);
                }
                Err(e) => {
                    tracing::error!(backend = %backend.id, address = %backend.address, error = %e, "Skipping backend with invalid address");
                }
            }
        }

        let (trigger, prober) = if health.enabled {
            let (trigger, triggers) = ProbeTrigger::channel();
            let trigger = if health.fast_probe_on_failure {
                trigger
            } else {
                ProbeTrigger::disabled()
            };
            (trigger, Some(HealthProber::new(registry.clone(), health, triggers)))
        } else {
            (ProbeTrigger::disabled(), None)
        };

        let reconciler = config
            .capacity
            .enabled
            .then(|| Reconciler::new(registry.clone(), provisioner, events.clone(), config.capacity.clone()));
        let reconciler_status = reconciler.as_ref().map(|r| r.status());

        let forwarder = Arc::new(Forwarder::new(
            AffinityRouter::new(registry.clone()),
            &config,
            trigger,
            events,
        ));

        Self {
            config,
            registry,
            forwarder,
            prober,
            reconciler,
            reconciler_status,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn router(&self) -> &AffinityRouter {
        self.forwarder.router()
    }

    pub fn forwarder(&self) -> &Arc<Forwarder> {
        &self.forwarder
    }

    /// Live reconciler status, when capacity management is enabled.
    pub fn reconciler_status(&self) -> Option<watch::Receiver<ReconcilerStatus>> {
        self.reconciler_status.clone()
    }

    /// Router for the admin API, sharing this server's registry.
    pub fn admin_router(&self) -> Router {
        // Without active checks nothing would ever promote an Unhealthy registration.
        let initial = if self.config.health_check.enabled {
            HealthState::Unhealthy
        } else {
            HealthState::Healthy
        };
        admin::setup_admin_router(AdminState::new(
            self.registry.clone(),
            self.reconciler_status.clone(),
            self.config.admin.api_key.clone(),
            initial,
        ))
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }),
            )
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes));

        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(middleware)
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.registry.len(),
            healthy = self.registry.healthy_count(),
            "HTTP server starting"
        );

        if let Some(prober) = self.prober {
            tokio::spawn(prober.run(shutdown.resubscribe()));
        }
        if let Some(reconciler) = self.reconciler {
            tokio::spawn(reconciler.run(shutdown.resubscribe()));
        }

        let app = Self::build_router(&self.config, AppState { forwarder: self.forwarder })
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Catch-all handler: every path and method is proxied.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    state.forwarder.forward(request, peer).await
}
