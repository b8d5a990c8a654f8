//! Request forwarding.
//!
//! # Responsibilities
//! - Derive the session key and pick the affinity backend
//! - Forward with forwarding headers under one overall deadline
//! - Retry an idempotent request once on the next ring backend
//! - Turn failures into 502/503/504 and report them
//!
//! # Design Decisions
//! - Only idempotent bodies are buffered; everything else streams through
//! - A failed forward asks the prober for a fast probe; traffic never marks
//!   a backend unhealthy by itself
//! - Backend status codes are passed through, 5xx included

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::config::ProxyConfig;
use crate::health::passive::ProbeTrigger;
use crate::http::request::{forwarded_headers, ForwardingContext, RequestIdExt};
use crate::http::response::{self, relay};
use crate::load_balancer::backend::{Backend, BackendId};
use crate::observability::events::{Event, EventSink, RoutingFailureKind};
use crate::observability::metrics;
use crate::resilience::{Deadline, DeadlineExceeded, RetryPolicy};
use crate::routing::router::AffinityRouter;
use crate::routing::session::{SessionKey, SessionKeyExtractor};

/// Request body as it is replayed across attempts.
enum Payload {
    Buffered(Bytes),
    Streaming(Option<Body>),
}

impl Payload {
    fn next_body(&mut self) -> Body {
        match self {
            Payload::Buffered(bytes) => Body::from(bytes.clone()),
            Payload::Streaming(body) => body.take().unwrap_or_else(Body::empty),
        }
    }
}

/// Forwards client requests to affinity-selected backends.
#[derive(Debug)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    router: AffinityRouter,
    keys: SessionKeyExtractor,
    trigger: ProbeTrigger,
    events: Arc<dyn EventSink>,
    retries: RetryPolicy,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl Forwarder {
    pub fn new(router: AffinityRouter, config: &ProxyConfig, trigger: ProbeTrigger, events: Arc<dyn EventSink>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.timeouts.connect_ms)));
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_secs(config.timeouts.idle_secs))
            .build(connector);

        Self {
            client,
            router,
            keys: SessionKeyExtractor::new(&config.affinity),
            trigger,
            events,
            retries: RetryPolicy::from_config(&config.retries),
            request_timeout: Duration::from_millis(config.timeouts.request_ms),
            max_body_bytes: config.listener.max_body_bytes,
        }
    }

    pub fn router(&self) -> &AffinityRouter {
        &self.router
    }

    /// Session key the request would be routed by.
    pub fn session_key(&self, headers: &HeaderMap, peer: SocketAddr) -> SessionKey {
        self.keys.derive(headers, peer)
    }

    pub async fn forward(&self, request: Request<Body>, peer: SocketAddr) -> Response<Body> {
        let start = Instant::now();
        let deadline = Deadline::after(self.request_timeout);
        let request_id = request.headers().request_id();
        let method = request.method().clone();
        let key = self.keys.derive(request.headers(), peer);
        let client_ip = self.keys.client_ip(request.headers(), peer);

        // Counted from the moment it is routed, so a drain started while the
        // body is still arriving waits for this request.
        let mut guard = match self.router.route(&key) {
            Ok(backend) => backend.begin_request(),
            Err(_) => {
                tracing::warn!(request_id = %request_id, key = %key, "No healthy backend for request");
                return self.fail(RoutingFailureKind::NoAvailableBackend, None, &request_id, method.as_str(), start);
            }
        };

        let (parts, body) = request.into_parts();
        let max_attempts = self.retries.max_attempts(&method);
        let mut payload = if max_attempts > 1 {
            match deadline.run(axum::body::to_bytes(body, self.max_body_bytes)).await {
                Ok(Ok(bytes)) => Payload::Buffered(bytes),
                Ok(Err(e)) => {
                    tracing::warn!(request_id = %request_id, error = %e, "Failed to read request body");
                    metrics::record_request(method.as_str(), 400, "none", start);
                    return response::proxy_error(StatusCode::BAD_REQUEST, "Failed to read request body");
                }
                Err(DeadlineExceeded) => {
                    return self.fail(RoutingFailureKind::DeadlineExceeded, None, &request_id, method.as_str(), start);
                }
            }
        } else {
            Payload::Streaming(Some(body))
        };

        if !self.router.is_current(guard.backend()) {
            match self.router.route(&key) {
                Ok(next) => {
                    tracing::debug!(
                        request_id = %request_id,
                        left = %guard.id,
                        next = %next.id,
                        "Backend left the ring while the body was read, rerouting"
                    );
                    guard = next.begin_request();
                }
                Err(_) => {
                    tracing::warn!(request_id = %request_id, key = %key, "No healthy backend for request");
                    return self.fail(RoutingFailureKind::NoAvailableBackend, None, &request_id, method.as_str(), start);
                }
            }
        }

        let mut backend = guard.backend().clone();
        let mut held = Some(guard);
        let mut tried: Vec<BackendId> = Vec::with_capacity(max_attempts as usize);
        let mut attempt = 1;
        loop {
            tracing::debug!(
                request_id = %request_id,
                backend = %backend.id,
                address = %backend.addr,
                attempt,
                "Forwarding request"
            );

            let guard = held.take().unwrap_or_else(|| backend.begin_request());
            let headers = forwarded_headers(
                &parts.headers,
                ForwardingContext {
                    peer,
                    client_ip,
                    request_id: &request_id,
                    remaining: deadline.remaining(),
                },
            );
            let upstream = match upstream_request(&parts, headers, &backend, payload.next_body()) {
                Ok(req) => req,
                Err(e) => {
                    tracing::error!(request_id = %request_id, error = %e, "Could not build upstream request");
                    metrics::record_request(method.as_str(), 500, backend.id.as_str(), start);
                    return response::proxy_error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid upstream request");
                }
            };

            match deadline.run(self.client.request(upstream)).await {
                Ok(Ok(resp)) => {
                    metrics::record_request(method.as_str(), resp.status().as_u16(), backend.id.as_str(), start);
                    return relay(resp, guard);
                }
                Ok(Err(e)) => {
                    drop(guard);
                    tracing::warn!(
                        request_id = %request_id,
                        backend = %backend.id,
                        attempt,
                        error = %e,
                        "Upstream error"
                    );
                    self.trigger.fast_probe(&backend.id);
                    tried.push(backend.id.clone());

                    if attempt < max_attempts {
                        if let Ok(next) = self.router.route_excluding(&key, &tried) {
                            self.events.emit(Event::ForwardRetried {
                                failed: backend.id.clone(),
                                next: next.id.clone(),
                                request_id: request_id.clone(),
                            });
                            backend = next;
                            attempt += 1;
                            continue;
                        }
                    }
                    return self.fail(
                        RoutingFailureKind::ForwardingFailure,
                        Some(backend.id.clone()),
                        &request_id,
                        method.as_str(),
                        start,
                    );
                }
                Err(DeadlineExceeded) => {
                    drop(guard);
                    return self.fail(
                        RoutingFailureKind::DeadlineExceeded,
                        Some(backend.id.clone()),
                        &request_id,
                        method.as_str(),
                        start,
                    );
                }
            }
        }
    }

    fn fail(
        &self,
        kind: RoutingFailureKind,
        backend: Option<BackendId>,
        request_id: &str,
        method: &str,
        start: Instant,
    ) -> Response<Body> {
        let response = match kind {
            RoutingFailureKind::NoAvailableBackend => response::no_available_backend(),
            RoutingFailureKind::ForwardingFailure => response::forwarding_failed(),
            RoutingFailureKind::DeadlineExceeded => response::deadline_exceeded(),
        };
        let label = backend.as_ref().map(|b| b.as_str()).unwrap_or("none");
        metrics::record_request(method, response.status().as_u16(), label, start);
        self.events.emit(Event::RoutingFailure {
            kind,
            backend,
            request_id: request_id.to_string(),
        });
        response
    }
}

fn upstream_request(
    parts: &Parts,
    headers: HeaderMap,
    backend: &Backend,
    body: Body,
) -> Result<Request<Body>, axum::http::Error> {
    let path = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(format!("http://{}{}", backend.addr, path))
        .body(body)?;
    *request.headers_mut() = headers;
    Ok(request)
}
