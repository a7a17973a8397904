// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Security headers applied to every response.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::config::SecurityHeadersConfig;
use crate::state::AppState;

/// Headers rendered once from configuration.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    /// Render `config`. Values that are not valid header text are skipped.
    pub fn from_config(config: &SecurityHeadersConfig) -> Self {
        let mut headers = Vec::new();
        let mut push = |name: HeaderName, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.push((name, value));
            }
        };

        if let Some(csp) = &config.content_security_policy {
            push(header::CONTENT_SECURITY_POLICY, csp);
        }
        if let Some(max_age) = config.hsts_max_age {
            let mut hsts = format!("max-age={}; includeSubDomains", max_age.as_secs());
            if config.hsts_preload {
                hsts.push_str("; preload");
            }
            push(header::STRICT_TRANSPORT_SECURITY, &hsts);
        }
        push(header::X_FRAME_OPTIONS, &config.frame_options);
        push(header::X_CONTENT_TYPE_OPTIONS, "nosniff");
        push(header::X_XSS_PROTECTION, &config.xss_protection);
        push(header::REFERRER_POLICY, &config.referrer_policy);
        if let Some(policy) = &config.permissions_policy {
            push(HeaderName::from_static("permissions-policy"), policy);
        }
        push(
            HeaderName::from_static("cross-origin-opener-policy"),
            &config.cross_origin_opener_policy,
        );
        push(
            HeaderName::from_static("cross-origin-resource-policy"),
            &config.cross_origin_resource_policy,
        );
        if let Some(policy) = &config.cross_origin_embedder_policy {
            push(HeaderName::from_static("cross-origin-embedder-policy"), policy);
        }

        Self { headers }
    }

    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
        target.remove(header::SERVER);
    }
}

/// Middleware: decorate every response, error responses included.
pub async fn security_headers(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    state.security_headers.apply(response.headers_mut());
    response
}
