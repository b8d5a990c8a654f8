//! Admin API.
//!
//! Served on its own listener and protected by a Bearer token. Provisioned
//! instances join the pool through `POST /admin/backends`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tokio::sync::watch;

use crate::health::state::HealthState;
use crate::load_balancer::registry::Registry;
use crate::reconciler::ReconcilerStatus;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
    pub reconciler: Option<watch::Receiver<ReconcilerStatus>>,
    pub api_key: Arc<str>,
    /// State given to backends registered at runtime.
    pub initial_health: HealthState,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(
        registry: Arc<Registry>,
        reconciler: Option<watch::Receiver<ReconcilerStatus>>,
        api_key: impl Into<Arc<str>>,
        initial_health: HealthState,
    ) -> Self {
        Self {
            registry,
            reconciler,
            api_key: api_key.into(),
            initial_health,
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends).post(register_backend))
        .route("/admin/backends/{id}", delete(remove_backend))
        .route("/admin/backends/{id}/drain", post(drain_backend))
        .route("/admin/reconciler", get(get_reconciler))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
