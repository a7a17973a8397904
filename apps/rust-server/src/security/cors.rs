// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # CORS Gate
//!
//! Origin rules:
//!
//! - exact match (`https://app.example.com`)
//! - `scheme://*.domain` matches any subdomain with the same scheme
//! - literal `*` matches anything, but only when strict origin checking is off.
//!   Origins admitted only by `*` never receive
//!   `Access-Control-Allow-Credentials`
//!
//! A preflight (`OPTIONS` carrying `Origin`) from an allowed origin is answered
//! `204` here; from any other origin it is refused with `403`. Actual requests
//! always reach the handler; the allow headers are added only for allowed
//! origins.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::config::CorsConfig;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    Exact(String),
    Subdomain { scheme: String, suffix: String },
    Any,
}

impl OriginRule {
    fn parse(rule: &str, strict: bool) -> Option<Self> {
        let rule = rule.trim().trim_end_matches('/');
        if rule == "*" {
            return (!strict).then_some(OriginRule::Any);
        }
        if let Some((scheme, host)) = rule.split_once("://") {
            if let Some(domain) = host.strip_prefix("*.") {
                return Some(OriginRule::Subdomain {
                    scheme: scheme.to_ascii_lowercase(),
                    suffix: format!(".{}", domain.to_ascii_lowercase()),
                });
            }
        }
        Some(OriginRule::Exact(rule.to_ascii_lowercase()))
    }

    fn matches(&self, origin: &str) -> bool {
        match self {
            OriginRule::Any => true,
            OriginRule::Exact(allowed) => *allowed == origin,
            OriginRule::Subdomain { scheme, suffix } => origin
                .split_once("://")
                .is_some_and(|(s, host)| s == scheme && host.len() > suffix.len() && host.ends_with(suffix.as_str())),
        }
    }
}

/// How an origin was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Listed,
    Wildcard,
}

/// Compiled CORS settings.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    rules: Vec<OriginRule>,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    max_age: HeaderValue,
    allow_credentials: bool,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> Self {
        let rules = config
            .allowed_origins
            .iter()
            .filter_map(|rule| {
                let parsed = OriginRule::parse(rule, config.strict_origin_checking);
                if parsed.is_none() {
                    warn!(rule = %rule, "Ignoring wildcard CORS origin under strict checking");
                }
                parsed
            })
            .collect();
        Self {
            rules,
            allow_methods: header_list(&config.allowed_methods),
            allow_headers: header_list(&config.allowed_headers),
            max_age: HeaderValue::from(config.max_age.as_secs()),
            allow_credentials: config.allow_credentials,
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.admit(origin).is_some()
    }

    /// Listed rules take precedence over `*`.
    fn admit(&self, origin: &str) -> Option<Admission> {
        let origin = origin.trim_end_matches('/').to_ascii_lowercase();
        if self
            .rules
            .iter()
            .any(|rule| *rule != OriginRule::Any && rule.matches(&origin))
        {
            Some(Admission::Listed)
        } else if self.rules.contains(&OriginRule::Any) {
            Some(Admission::Wildcard)
        } else {
            None
        }
    }

    fn decorate(&self, headers: &mut HeaderMap, origin: &HeaderValue, admission: Admission) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        if self.allow_credentials && admission == Admission::Listed {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }

    fn preflight(&self, origin: &HeaderValue, admission: Admission) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        self.decorate(headers, origin, admission);
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        response
    }
}

fn header_list(items: &[String]) -> HeaderValue {
    HeaderValue::from_str(&items.join(", ")).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Middleware: answer preflights and echo allowed origins.
pub async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let policy = &state.cors;
    let origin = request.headers().get(header::ORIGIN).cloned();
    let admission = origin
        .as_ref()
        .and_then(|o| o.to_str().ok())
        .and_then(|o| policy.admit(o));

    if request.method() == Method::OPTIONS {
        if let Some(origin) = &origin {
            if let Some(admission) = admission {
                return policy.preflight(origin, admission);
            }
            warn!(
                origin = ?origin,
                path = %request.uri().path(),
                "Rejected CORS preflight from disallowed origin"
            );
            return ApiError::forbidden("Origin not allowed").into_response();
        }
    }

    let mut response = next.run(request).await;
    if let (Some(origin), Some(admission)) = (origin, admission) {
        policy.decorate(response.headers_mut(), &origin, admission);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn policy(origins: &[&str], strict: bool) -> CorsPolicy {
        let mut config = CorsConfig::for_environment(Environment::Development);
        config.allowed_origins = origins.iter().map(|s| s.to_string()).collect();
        config.strict_origin_checking = strict;
        CorsPolicy::from_config(&config)
    }

    #[test]
    fn exact_origin_matches() {
        let p = policy(&["https://app.example.com"], true);
        assert!(p.is_allowed("https://app.example.com"));
        assert!(p.is_allowed("https://APP.example.com/"));
        assert!(!p.is_allowed("http://app.example.com"));
        assert!(!p.is_allowed("https://evil.test"));
    }

    #[test]
    fn wildcard_subdomain_requires_scheme_and_suffix() {
        let p = policy(&["https://*.example.com"], true);
        assert!(p.is_allowed("https://app.example.com"));
        assert!(p.is_allowed("https://a.b.example.com"));
        assert!(!p.is_allowed("http://app.example.com"));
        assert!(!p.is_allowed("https://example.com"));
        assert!(!p.is_allowed("https://evilexample.com"));
    }

    #[test]
    fn literal_star_only_without_strict_checking() {
        assert!(policy(&["*"], false).is_allowed("https://anything.test"));
        assert!(!policy(&["*"], true).is_allowed("https://anything.test"));
    }

    #[test]
    fn preflight_carries_allow_headers() {
        let p = policy(&["https://app.example.com"], true);
        let response = p.preflight(
            &HeaderValue::from_static("https://app.example.com"),
            Admission::Listed,
        );
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "600");
        assert!(headers[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap()
            .contains("PATCH"));
    }

    #[test]
    fn wildcard_admission_never_allows_credentials() {
        let p = policy(&["https://app.example.com", "*"], false);
        assert_eq!(p.admit("https://app.example.com"), Some(Admission::Listed));
        assert_eq!(p.admit("https://anything.test"), Some(Admission::Wildcard));

        let origin = HeaderValue::from_static("https://anything.test");
        let response = p.preflight(&origin, Admission::Wildcard);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://anything.test");
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS));

        let listed = p.preflight(
            &HeaderValue::from_static("https://app.example.com"),
            Admission::Listed,
        );
        assert_eq!(listed.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
