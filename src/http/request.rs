//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4) when the client sent none
//! - Build the header set forwarded to a backend
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Hop-by-hop headers never cross the proxy
//! - `X-Forwarded-For` is appended to, never replaced

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_REAL_IP: &str = "x-real-ip";
pub const X_REQUEST_TIMEOUT_MS: &str = "x-request-timeout-ms";

/// Generates UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string()).ok().map(RequestId::new)
    }
}

/// Extension trait to read the request id set by the request-id layer.
pub trait RequestIdExt {
    fn request_id(&self) -> String;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> String {
        self.get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// Headers meaningful only for a single connection (RFC 9110 §7.6.1).
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Drop hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
}

/// Everything the forwarding headers are derived from.
#[derive(Debug, Clone, Copy)]
pub struct ForwardingContext<'a> {
    pub peer: SocketAddr,
    pub client_ip: IpAddr,
    pub request_id: &'a str,
    pub remaining: Duration,
}

/// Copy of the client's headers prepared for a backend.
pub fn forwarded_headers(original: &HeaderMap, ctx: ForwardingContext<'_>) -> HeaderMap {
    let mut headers = original.clone();
    strip_hop_by_hop(&mut headers);

    let peer_ip = ctx.peer.ip().to_string();
    let forwarded_for = match original.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, peer_ip),
        _ => peer_ip,
    };
    insert(&mut headers, X_FORWARDED_FOR, &forwarded_for);

    if let Some(host) = original.get(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    insert(&mut headers, X_REAL_IP, &ctx.client_ip.to_string());
    insert(&mut headers, X_REQUEST_ID, ctx.request_id);
    insert(&mut headers, X_REQUEST_TIMEOUT_MS, &ctx.remaining.as_millis().to_string());
    headers
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(request_id: &str) -> ForwardingContext<'_> {
        ForwardingContext {
            peer: "10.0.0.9:5123".parse().unwrap(),
            client_ip: "10.0.0.9".parse().unwrap(),
            request_id,
            remaining: Duration::from_millis(1500),
        }
    }

    #[test]
    fn adds_forwarding_headers() {
        let mut original = HeaderMap::new();
        original.insert(header::HOST, HeaderValue::from_static("app.example.com"));
        let headers = forwarded_headers(&original, ctx("req-1"));

        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.9");
        assert_eq!(headers[X_FORWARDED_HOST], "app.example.com");
        assert_eq!(headers[X_FORWARDED_PROTO], "http");
        assert_eq!(headers[X_REAL_IP], "10.0.0.9");
        assert_eq!(headers[X_REQUEST_ID], "req-1");
        assert_eq!(headers[X_REQUEST_TIMEOUT_MS], "1500");
        assert_eq!(headers[header::HOST], "app.example.com");
    }

    #[test]
    fn appends_to_existing_forwarded_for() {
        let mut original = HeaderMap::new();
        original.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        let headers = forwarded_headers(&original, ctx("r"));
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.7, 10.0.0.9");
    }

    #[test]
    fn strips_hop_by_hop_and_connection_listed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn generated_ids_are_uuids() {
        let request = Request::new(());
        let id = UuidRequestId.make_request_id(&request).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }
}
