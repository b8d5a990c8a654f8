//! Session key derivation.
//!
//! # Responsibilities
//! - Identify the client of a request for affinity purposes
//! - Support IP, subnet (`ip_hash`), header and cookie based identity
//!
//! # Design Decisions
//! - Missing header/cookie falls back to the client IP, never to "no key"
//! - `X-Forwarded-For` is only honored when explicitly trusted

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::http::{header, HeaderMap};

use crate::config::{AffinityConfig, KeySource};
use crate::routing::ring::ring_hash;

/// Client identity used for affinity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Position on the ring.
    pub fn ring_hash(&self) -> u64 {
        ring_hash(self.0.as_bytes())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives session keys from request metadata.
#[derive(Debug, Clone)]
pub struct SessionKeyExtractor {
    source: KeySource,
    trust_forwarded_for: bool,
}

impl SessionKeyExtractor {
    pub fn new(config: &AffinityConfig) -> Self {
        Self {
            source: config.key_source.clone(),
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }

    /// Effective client address: the peer, or the first trusted forwarded hop.
    pub fn client_ip(&self, headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
        if self.trust_forwarded_for {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return ip;
            }
        }
        peer.ip()
    }

    pub fn derive(&self, headers: &HeaderMap, peer: SocketAddr) -> SessionKey {
        let ip = self.client_ip(headers, peer);
        match &self.source {
            KeySource::ClientIp => SessionKey::new(ip.to_string()),
            KeySource::IpHash => SessionKey::new(subnet_key(ip)),
            KeySource::Header(name) => headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(|v| SessionKey::new(format!("h:{}", v)))
                .unwrap_or_else(|| SessionKey::new(ip.to_string())),
            KeySource::Cookie(name) => cookie_value(headers, name)
                .map(|v| SessionKey::new(format!("c:{}", v)))
                .unwrap_or_else(|| SessionKey::new(ip.to_string())),
        }
    }
}

/// IPv4 keeps the first three octets; IPv6 keeps the whole address.
fn subnet_key(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            format!("{}.{}.{}", a, b, c)
        }
        IpAddr::V6(v6) => v6.to_string(),
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}
