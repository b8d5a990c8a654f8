//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay backend responses to the client
//! - Map proxy-side failures to HTTP status codes
//!
//! # Design Decisions
//! - Streaming responses avoid buffering the entire body
//! - Hop-by-hop headers stripped automatically
//! - The backend's in-flight count covers the body, not just the headers

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use futures_util::StreamExt;
use hyper::body::Incoming;

use crate::http::request::strip_hop_by_hop;
use crate::load_balancer::backend::InFlightGuard;

/// Pass a backend response through, releasing `guard` once the body is done.
pub fn relay(response: Response<Incoming>, guard: InFlightGuard) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let stream = Body::new(body).into_data_stream().map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

/// Response for a request the proxy could not complete.
pub fn proxy_error(status: StatusCode, message: &'static str) -> Response<Body> {
    (status, message).into_response()
}

pub fn no_available_backend() -> Response<Body> {
    proxy_error(StatusCode::SERVICE_UNAVAILABLE, "No healthy backends")
}

pub fn forwarding_failed() -> Response<Body> {
    proxy_error(StatusCode::BAD_GATEWAY, "Upstream request failed")
}

pub fn deadline_exceeded() -> Response<Body> {
    proxy_error(StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out")
}
