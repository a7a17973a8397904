// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client address resolution.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the client IP.
///
/// Forwarding headers are only honoured when the socket peer is one of
/// `trusted_proxies`: then the first `X-Forwarded-For` hop wins, then
/// `X-Real-IP`, then the proxy itself. Any other peer is the client. Without a
/// socket peer the result is `"unknown"`.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
    else {
        return UNKNOWN_CLIENT.to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').map(str::trim).find(|hop| !hop.is_empty()));
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string())
}

/// `User-Agent` header, if readable.
pub fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const PROXY: [u8; 4] = [10, 0, 0, 2];

    fn from_peer(ip: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((ip, 4000))));
        extensions
    }

    fn forwarded(xff: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(xff));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        headers
    }

    #[test]
    fn trusted_proxy_forwards_first_hop() {
        let trusted = [IpAddr::from(PROXY)];
        let ip = client_ip(&forwarded("203.0.113.7, 10.0.0.1"), &from_peer(PROXY), &trusted);
        assert_eq!(ip, "203.0.113.7");
    }

    #[test]
    fn trusted_proxy_falls_back_to_real_ip_then_itself() {
        let trusted = [IpAddr::from(PROXY)];
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, &from_peer(PROXY), &trusted), "198.51.100.2");
        assert_eq!(client_ip(&HeaderMap::new(), &from_peer(PROXY), &trusted), "10.0.0.2");
    }

    #[test]
    fn spoofed_headers_from_untrusted_peer_are_ignored() {
        let trusted = [IpAddr::from(PROXY)];
        let ip = client_ip(&forwarded("203.0.113.7"), &from_peer([192, 0, 2, 1]), &trusted);
        assert_eq!(ip, "192.0.2.1");

        let ip = client_ip(&forwarded("203.0.113.7"), &from_peer([192, 0, 2, 1]), &[]);
        assert_eq!(ip, "192.0.2.1");
    }

    #[test]
    fn missing_peer_is_unknown() {
        let trusted = [IpAddr::from(PROXY)];
        assert_eq!(
            client_ip(&forwarded("203.0.113.7"), &Extensions::new(), &trusted),
            UNKNOWN_CLIENT
        );
    }
}
