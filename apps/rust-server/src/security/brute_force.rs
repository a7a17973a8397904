// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Abuse Guard
//!
//! Failure counting and lockout for the credential endpoints, independent of
//! the rate limiter.
//!
//! Only `POST` to `/auth/login`, `/auth/register`, `/auth/forgot-password` and
//! `/auth/reset-password` is guarded. Each request is tracked under
//! `ip:<client-ip>` and `email:<normalized-email>` (either may be disabled).
//!
//! ## Record Lifecycle
//!
//! - First failure: `count = 1`, `first_seen = last_seen = now`
//! - Failure within the window: `count += 1`; at `max_attempts` the record is
//!   blocked until `now + block_duration`
//! - Failure after the window: counting restarts at 1
//! - Blocked: every request is refused until `now > blocked_until`, then the
//!   record is deleted
//! - Successful login or password reset: record deleted. Other successes
//!   (registration, forgot-password) prove nothing and leave it untouched
//!
//! The request body is buffered to read `email` and handed on unchanged.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use super::client::client_ip;
use crate::config::BruteForceConfig;
use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

/// Routes covered by the guard (POST only).
pub const GUARDED_ROUTES: [&str; 4] = [
    "/auth/login",
    "/auth/register",
    "/auth/forgot-password",
    "/auth/reset-password",
];

/// Routes whose success proves the caller holds a credential.
const CLEARING_ROUTES: [&str; 2] = ["/auth/login", "/auth/reset-password"];

/// Largest body the guard will buffer to find the email.
const MAX_INSPECTED_BODY: usize = 1024 * 1024;

#[derive(Debug, Clone)]
struct AbuseRecord {
    count: u32,
    first_seen: Instant,
    last_seen: Instant,
    blocked: bool,
    blocked_until: Option<Instant>,
}

impl AbuseRecord {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 1,
            first_seen: now,
            last_seen: now,
            blocked: false,
            blocked_until: None,
        }
    }

    /// Remaining block time, `None` when not (or no longer) blocked.
    fn remaining_block(&self, now: Instant) -> Option<Duration> {
        match self.blocked_until {
            Some(until) if self.blocked && now <= until => Some(until - now),
            _ => None,
        }
    }

    fn block_expired(&self, now: Instant) -> bool {
        self.blocked && self.blocked_until.is_some_and(|until| now > until)
    }
}

/// Failure counters keyed by identifier.
#[derive(Debug)]
pub struct AbuseGuard {
    config: BruteForceConfig,
    records: RwLock<HashMap<String, AbuseRecord>>,
}

impl AbuseGuard {
    pub fn new(config: BruteForceConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BruteForceConfig {
        &self.config
    }

    /// Identifiers tracked for a request.
    pub fn identifiers(&self, ip: &str, email: Option<&str>) -> Vec<String> {
        let mut ids = Vec::with_capacity(2);
        if self.config.track_by_ip {
            ids.push(format!("ip:{ip}"));
        }
        if self.config.track_by_email {
            if let Some(email) = email.map(normalize_email).filter(|e| !e.is_empty()) {
                ids.push(format!("email:{email}"));
            }
        }
        ids
    }

    /// Remaining block for `id`. An expired block is deleted.
    pub fn blocked_for(&self, id: &str) -> Option<Duration> {
        let now = Instant::now();
        {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            match records.get(id) {
                None => return None,
                Some(record) if !record.block_expired(now) => {
                    return record.remaining_block(now);
                }
                Some(_) => {}
            }
        }
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.get(id).is_some_and(|r| r.block_expired(now)) {
            records.remove(id);
            debug!(identifier = id, "Abuse block expired");
        }
        None
    }

    /// Count one failure. Returns the block duration when this failure
    /// triggers a block.
    pub fn record_failure(&self, id: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .entry(id.to_string())
            .and_modify(|record| {
                let window_elapsed =
                    now.saturating_duration_since(record.first_seen) > self.config.attempt_window;
                if record.block_expired(now) || window_elapsed {
                    *record = AbuseRecord::fresh(now);
                } else if !record.blocked {
                    record.count += 1;
                    record.last_seen = now;
                }
            })
            .or_insert_with(|| AbuseRecord::fresh(now));

        if !record.blocked && record.count >= self.config.max_attempts {
            record.blocked = true;
            record.blocked_until = Some(now + self.config.block_duration);
            return Some(self.config.block_duration);
        }
        None
    }

    /// Forget `id`. Clearing twice is the same as clearing once.
    pub fn clear(&self, id: &str) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Current failure count for `id`.
    pub fn attempts(&self, id: &str) -> u32 {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map_or(0, |r| r.count)
    }

    /// Drop expired blocks and records idle for twice the block duration.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale_after = self.config.block_duration * 2;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, record| {
            if record.blocked {
                !record.block_expired(now)
            } else {
                now.saturating_duration_since(record.last_seen) <= stale_after
            }
        });
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the background sweeper. It stops on `shutdown` or once the guard
    /// has been dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let guard = Arc::downgrade(self);
        let interval = self.config.cleanup_interval;
        tokio::spawn(run_sweeper(guard, interval, shutdown))
    }
}

async fn run_sweeper(guard: Weak<AbuseGuard>, interval: Duration, shutdown: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "Abuse guard sweeper starting");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown.cancelled() => {
                info!("Abuse guard sweeper shutting down");
                return;
            }
        }
        let Some(guard) = guard.upgrade() else {
            return;
        };
        let removed = guard.sweep();
        if removed > 0 {
            debug!(removed, "Swept abuse records");
        }
    }
}

/// NFKC, trimmed, lowercased.
pub fn normalize_email(email: &str) -> String {
    email.nfkc().collect::<String>().trim().to_lowercase()
}

fn is_guarded(method: &Method, path: &str) -> bool {
    method == Method::POST && GUARDED_ROUTES.contains(&path)
}

/// Read `email` from a JSON or form body.
fn extract_email(content_type: Option<&str>, body: &[u8]) -> Option<String> {
    let content_type = content_type.unwrap_or_default();
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return url::form_urlencoded::parse(body)
            .find(|(k, _)| k == "email")
            .map(|(_, v)| v.into_owned());
    }
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("email")?
        .as_str()
        .map(str::to_string)
}

fn lockout_response(retry_after: Duration) -> Response {
    let secs = retry_after.as_secs().max(1);
    ApiError::new(
        ErrorCode::BruteForceProtection,
        "Too many failed attempts, please try again later",
    )
    .with_details(json!({ "retry_after": secs }))
    .with_retry_after(retry_after)
    .into_response()
}

/// Middleware: refuse blocked identifiers, then count the outcome.
pub async fn abuse_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !is_guarded(request.method(), request.uri().path()) {
        return next.run(request).await;
    }
    let guard = &state.abuse_guard;
    let ip = client_ip(
        request.headers(),
        request.extensions(),
        &state.config.trusted_proxies,
    );
    let path = request.uri().path().to_string();

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_INSPECTED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::from_code(ErrorCode::PayloadTooLarge).into_response(),
    };
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let email = extract_email(content_type, &bytes);
    let ids = guard.identifiers(&ip, email.as_deref());
    let request = Request::from_parts(parts, Body::from(bytes));

    for id in &ids {
        if let Some(remaining) = guard.blocked_for(id) {
            warn!(
                client_ip = %ip,
                path = %path,
                identifier = %id,
                retry_after_secs = remaining.as_secs(),
                "Blocked request from locked-out identifier"
            );
            return lockout_response(remaining);
        }
    }

    let response = next.run(request).await;
    match response.status() {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            let mut block = None;
            for id in &ids {
                if let Some(duration) = guard.record_failure(id) {
                    block = Some(duration);
                    warn!(
                        client_ip = %ip,
                        path = %path,
                        identifier = %id,
                        block_secs = duration.as_secs(),
                        "Identifier locked out after repeated failures"
                    );
                }
            }
            match block {
                Some(duration) => lockout_response(duration),
                None => response,
            }
        }
        StatusCode::OK if CLEARING_ROUTES.contains(&path.as_str()) => {
            for id in &ids {
                guard.clear(id);
            }
            response
        }
        _ => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> AbuseGuard {
        AbuseGuard::new(BruteForceConfig::default())
    }

    #[test]
    fn identifiers_respect_tracking_flags() {
        let g = guard();
        assert_eq!(
            g.identifiers("1.2.3.4", Some("  Ana@Example.COM ")),
            vec!["ip:1.2.3.4", "email:ana@example.com"]
        );
        assert_eq!(g.identifiers("1.2.3.4", None), vec!["ip:1.2.3.4"]);

        let only_email = AbuseGuard::new(BruteForceConfig {
            track_by_ip: false,
            ..BruteForceConfig::default()
        });
        assert_eq!(
            only_email.identifiers("1.2.3.4", Some("a@b.co")),
            vec!["email:a@b.co"]
        );
    }

    #[test]
    fn email_normalization_applies_nfkc() {
        // Fullwidth letters fold to ASCII
        assert_eq!(normalize_email("ＡＮＡ@example.com"), "ana@example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_exactly_at_max_attempts() {
        let g = guard();
        for _ in 0..4 {
            assert_eq!(g.record_failure("ip:x"), None);
        }
        assert_eq!(g.attempts("ip:x"), 4);
        assert!(g.blocked_for("ip:x").is_none());

        assert_eq!(g.record_failure("ip:x"), Some(Duration::from_secs(1800)));
        assert_eq!(g.blocked_for("ip:x"), Some(Duration::from_secs(1800)));
    }

    #[tokio::test(start_paused = true)]
    async fn block_lifts_after_duration_and_record_is_deleted() {
        let g = guard();
        for _ in 0..5 {
            g.record_failure("ip:x");
        }
        tokio::time::advance(Duration::from_secs(1800)).await;
        assert!(g.blocked_for("ip:x").is_some());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(g.blocked_for("ip:x").is_none());
        assert!(g.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_restarts_count() {
        let g = guard();
        for _ in 0..4 {
            g.record_failure("ip:x");
        }
        tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;
        assert_eq!(g.record_failure("ip:x"), None);
        assert_eq!(g.attempts("ip:x"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_and_double_clear_is_harmless() {
        let g = guard();
        g.record_failure("email:a@b.co");
        g.clear("email:a@b.co");
        g.clear("email:a@b.co");
        assert_eq!(g.attempts("email:a@b.co"), 0);
        assert!(g.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_and_stale_records() {
        let g = guard();
        for _ in 0..5 {
            g.record_failure("ip:blocked");
        }
        g.record_failure("ip:idle");
        tokio::time::advance(Duration::from_secs(30 * 60 + 1)).await;
        g.record_failure("ip:recent");

        // Blocked record expired, idle record not yet stale
        assert_eq!(g.sweep(), 1);
        assert_eq!(g.len(), 2);

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert_eq!(g.sweep(), 1);
        assert_eq!(g.attempts("ip:recent"), 1);
    }

    #[test]
    fn extracts_email_from_json_and_form() {
        assert_eq!(
            extract_email(Some("application/json"), br#"{"email":"a@b.co","password":"x"}"#),
            Some("a@b.co".to_string())
        );
        assert_eq!(
            extract_email(
                Some("application/x-www-form-urlencoded"),
                b"password=x&email=a%40b.co"
            ),
            Some("a@b.co".to_string())
        );
        assert_eq!(extract_email(Some("application/json"), b"not json"), None);
    }

    #[test]
    fn only_post_to_auth_routes_is_guarded() {
        assert!(is_guarded(&Method::POST, "/auth/login"));
        assert!(is_guarded(&Method::POST, "/auth/reset-password"));
        assert!(!is_guarded(&Method::GET, "/auth/login"));
        assert!(!is_guarded(&Method::POST, "/auth/refresh"));
    }
}
