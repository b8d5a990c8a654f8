use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::load_balancer::backend::{BackendId, BackendSnapshot};
use crate::load_balancer::registry::Registration;
use crate::reconciler::{CapacityState, ReconcilerStatus};

type AdminResult<T> = Result<T, (StatusCode, String)>;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub backends: usize,
    pub healthy: usize,
    pub capacity: Option<CapacityState>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterBackend {
    pub id: String,
    pub address: String,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let healthy = state.registry.healthy_count();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if healthy > 0 { "operational" } else { "degraded" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        backends: state.registry.len(),
        healthy,
        capacity: state.reconciler.as_ref().map(|r| r.borrow().state),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendSnapshot>> {
    Json(state.registry.snapshot())
}

pub async fn register_backend(
    State(state): State<AdminState>,
    Json(body): Json<RegisterBackend>,
) -> AdminResult<(StatusCode, Json<BackendSnapshot>)> {
    if body.id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "backend id must not be empty".into()));
    }
    let addr: SocketAddr = body
        .address
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid address: {}", body.address)))?;

    let id = BackendId::new(body.id.trim());
    let status = match state.registry.register(id.clone(), addr, state.initial_health) {
        Registration::Added | Registration::Replaced => StatusCode::CREATED,
        Registration::Unchanged => StatusCode::OK,
    };
    let snapshot = state
        .registry
        .get(&id)
        .map(|b| b.snapshot())
        .ok_or_else(|| not_found(&id))?;
    Ok((status, Json(snapshot)))
}

pub async fn remove_backend(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> AdminResult<Json<BackendSnapshot>> {
    let id = BackendId::new(id);
    state.registry.remove(&id).map(Json).ok_or_else(|| not_found(&id))
}

/// Starts draining and returns immediately; removal happens once idle.
pub async fn drain_backend(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> AdminResult<(StatusCode, Json<BackendSnapshot>)> {
    let id = BackendId::new(id);
    state.registry.drain(&id).map_err(|_| not_found(&id))?;
    let snapshot = state
        .registry
        .get(&id)
        .map(|b| b.snapshot())
        .ok_or_else(|| not_found(&id))?;

    let registry = state.registry.clone();
    tokio::spawn(async move {
        match registry.drain_and_remove(&id).await {
            Ok(removed) => tracing::info!(backend = %removed.id, "Drained backend removed"),
            Err(e) => tracing::warn!(backend = %id, error = %e, "Drain did not complete"),
        }
    });
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

pub async fn get_reconciler(State(state): State<AdminState>) -> AdminResult<Json<ReconcilerStatus>> {
    state
        .reconciler
        .as_ref()
        .map(|r| Json(r.borrow().clone()))
        .ok_or_else(|| (StatusCode::NOT_FOUND, "capacity management disabled".into()))
}

fn not_found(id: &BackendId) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("backend not found: {}", id))
}
