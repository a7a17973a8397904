// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Rate Limiter
//!
//! Token bucket per request fingerprint. The fingerprint is a SHA-256 digest of
//! the client IP, an optional subject, and the route class, so callers choose
//! the granularity.
//!
//! ## Route Classes
//!
//! | Prefix | Class | Default rate | Burst |
//! |--------|-------|--------------|-------|
//! | `/auth` | [`RouteClass::Auth`] | 1 per 12 s | 5 |
//! | `/public` | [`RouteClass::PublicRead`] | ~1.6/s | 20 |
//! | `/analytics` | [`RouteClass::Analytics`] | 10/s | 50 |
//! | `/admin` | [`RouteClass::Admin`] | 1 per 30 s | 3 |
//! | anything else | [`RouteClass::General`] | ~16/s | 50 |
//!
//! The longest matching prefix wins.
//!
//! ## Locking
//!
//! The bucket map sits behind a reader/writer lock. Lookups take the read
//! lock; get-or-insert and sweeping take the write lock. Each bucket has its
//! own mutex, so refill and consume are one critical section per bucket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::client_ip;
use crate::config::RateLimitConfig;
use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

/// Bucket configuration chosen by path prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Auth,
    PublicRead,
    General,
    Analytics,
    Admin,
}

const ROUTE_PREFIXES: &[(&str, RouteClass)] = &[
    ("/auth", RouteClass::Auth),
    ("/public", RouteClass::PublicRead),
    ("/analytics", RouteClass::Analytics),
    ("/admin", RouteClass::Admin),
];

impl RouteClass {
    /// Longest-prefix match on whole path segments; `General` when nothing
    /// matches.
    pub fn classify(path: &str) -> Self {
        ROUTE_PREFIXES
            .iter()
            .filter(|(prefix, _)| {
                path == *prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, class)| *class)
            .unwrap_or(RouteClass::General)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Auth => "auth",
            RouteClass::PublicRead => "public_read",
            RouteClass::General => "general",
            RouteClass::Analytics => "analytics",
            RouteClass::Admin => "admin",
        }
    }
}

/// Sustained rate, burst and eviction settings for one route class.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketPolicy {
    /// Tokens added per second
    pub rate: f64,
    /// Bucket capacity
    pub burst: u32,
    pub cleanup_interval: Duration,
    /// Buckets idle longer than this are evicted
    pub entry_ttl: Duration,
}

impl BucketPolicy {
    pub fn per_second(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst,
            cleanup_interval: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(600),
        }
    }

    pub fn per_minute(per_minute: f64, burst: u32) -> Self {
        Self::per_second(per_minute / 60.0, burst)
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    rate: f64,
    burst: f64,
    entry_ttl: Duration,
}

impl TokenBucket {
    fn new(policy: &BucketPolicy, now: Instant) -> Self {
        Self {
            tokens: f64::from(policy.burst),
            last_update: now,
            rate: policy.rate,
            burst: f64::from(policy.burst),
            entry_ttl: policy.entry_ttl,
        }
    }

    /// Refill, then take one token. `Err` carries the wait until one is
    /// available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_update);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.rate > 0.0 {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        } else {
            Err(self.entry_ttl)
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_update) > self.entry_ttl
    }
}

/// Identifies a bucket.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint<'a> {
    pub client_ip: &'a str,
    pub subject: Option<&'a str>,
    pub class: RouteClass,
}

impl Fingerprint<'_> {
    fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.client_ip.as_bytes());
        hasher.update([0]);
        if let Some(subject) = self.subject {
            hasher.update(subject.as_bytes());
        }
        hasher.update([0]);
        hasher.update(self.class.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Per-fingerprint token buckets with idle eviction.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Consume one token for `fingerprint`. `Err` carries the retry delay.
    pub fn check(&self, fingerprint: &Fingerprint<'_>) -> Result<(), Duration> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = Instant::now();
        let bucket = self.bucket(fingerprint, now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_take(now)
    }

    fn bucket(&self, fingerprint: &Fingerprint<'_>, now: Instant) -> Arc<Mutex<TokenBucket>> {
        let key = fingerprint.key();
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(&key) {
                return Arc::clone(bucket);
            }
        }
        let policy = self.config.policy(fingerprint.class);
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            buckets
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(policy, now)))),
        )
    }

    /// Remove buckets idle longer than their entry TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            !bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_idle(now)
        });
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shortest cleanup interval across route classes.
    fn cleanup_interval(&self) -> Duration {
        [
            &self.config.auth,
            &self.config.public_read,
            &self.config.general,
            &self.config.analytics,
            &self.config.admin,
        ]
        .iter()
        .map(|p| p.cleanup_interval)
        .min()
        .unwrap_or(Duration::from_secs(60))
    }

    /// Spawn the background sweeper. It stops on `shutdown` or once the
    /// limiter has been dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let sweeper = Sweeper {
            limiter: Arc::downgrade(self),
            interval: self.cleanup_interval(),
        };
        tokio::spawn(sweeper.run(shutdown))
    }
}

struct Sweeper {
    limiter: Weak<RateLimiter>,
    interval: Duration,
}

impl Sweeper {
    async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Rate limit sweeper starting"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Rate limit sweeper shutting down");
                    return;
                }
            }
            let Some(limiter) = self.limiter.upgrade() else {
                debug!("Rate limiter dropped; sweeper exiting");
                return;
            };
            let evicted = limiter.sweep();
            if evicted > 0 {
                debug!(evicted, remaining = limiter.len(), "Evicted idle rate buckets");
            }
        }
    }
}

/// Middleware: one token per request, keyed by client IP and route class.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let ip = client_ip(
        request.headers(),
        request.extensions(),
        &state.config.trusted_proxies,
    );
    let class = RouteClass::classify(request.uri().path());
    let fingerprint = Fingerprint {
        client_ip: &ip,
        subject: None,
        class,
    };

    match limiter.check(&fingerprint) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(
                client_ip = %ip,
                path = %request.uri().path(),
                method = %request.method(),
                route_class = class.as_str(),
                "Rate limit exceeded"
            );
            ApiError::from_code(ErrorCode::RateLimitExceeded)
                .with_details(json!({ "retry_after": retry_after.as_secs().max(1) }))
                .with_retry_after(retry_after)
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(policy: BucketPolicy) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            auth: policy.clone(),
            public_read: policy.clone(),
            general: policy.clone(),
            analytics: policy.clone(),
            admin: policy,
        })
    }

    fn fp(ip: &str) -> Fingerprint<'_> {
        Fingerprint {
            client_ip: ip,
            subject: None,
            class: RouteClass::General,
        }
    }

    #[test]
    fn classifies_by_longest_segment_prefix() {
        assert_eq!(RouteClass::classify("/auth/login"), RouteClass::Auth);
        assert_eq!(RouteClass::classify("/auth"), RouteClass::Auth);
        assert_eq!(RouteClass::classify("/authors"), RouteClass::General);
        assert_eq!(
            RouteClass::classify("/public/weddings/ana-and-ben"),
            RouteClass::PublicRead
        );
        assert_eq!(RouteClass::classify("/analytics/events"), RouteClass::Analytics);
        assert_eq!(RouteClass::classify("/admin/stats"), RouteClass::Admin);
        assert_eq!(RouteClass::classify("/weddings"), RouteClass::General);
    }

    #[test]
    fn fingerprint_separates_subject_and_class() {
        let base = fp("1.2.3.4").key();
        let with_subject = Fingerprint {
            subject: Some("user_1"),
            ..fp("1.2.3.4")
        }
        .key();
        let other_class = Fingerprint {
            class: RouteClass::Auth,
            ..fp("1.2.3.4")
        }
        .key();
        assert_ne!(base, with_subject);
        assert_ne!(base, other_class);
        assert_eq!(base.len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_refill() {
        // 1 token per 12 s, burst 5
        let limiter = limiter_with(BucketPolicy::per_minute(5.0, 5));
        for _ in 0..5 {
            assert!(limiter.check(&fp("a")).is_ok());
        }
        let retry = limiter.check(&fp("a")).unwrap_err();
        assert!(retry <= Duration::from_secs(12));
        assert!(retry > Duration::from_secs(11));

        // Independent client unaffected
        assert!(limiter.check(&fp("b")).is_ok());

        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(limiter.check(&fp("a")).is_ok());
        assert!(limiter.check(&fp("a")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_burst() {
        let limiter = limiter_with(BucketPolicy::per_second(10.0, 3));
        assert!(limiter.check(&fp("a")).is_ok());
        tokio::time::advance(Duration::from_secs(3600)).await;
        for _ in 0..3 {
            assert!(limiter.check(&fp("a")).is_ok());
        }
        assert!(limiter.check(&fp("a")).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_overdraw() {
        let limiter = Arc::new(limiter_with(BucketPolicy::per_second(0.0001, 20)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                (0..10).filter(|_| limiter.check(&fp("shared")).is_ok()).count()
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            allowed += handle.await.unwrap();
        }
        assert_eq!(allowed, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_idle_buckets() {
        let policy = BucketPolicy {
            entry_ttl: Duration::from_secs(60),
            ..BucketPolicy::per_second(1.0, 1)
        };
        let limiter = limiter_with(policy);
        limiter.check(&fp("old")).unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        limiter.check(&fp("fresh")).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let policy = BucketPolicy {
            cleanup_interval: Duration::from_secs(10),
            entry_ttl: Duration::from_secs(30),
            ..BucketPolicy::per_second(1.0, 1)
        };
        let limiter = Arc::new(limiter_with(policy));
        let shutdown = CancellationToken::new();
        let handle = limiter.spawn_sweeper(shutdown.clone());

        limiter.check(&fp("a")).unwrap();
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(limiter.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_exits_when_limiter_dropped() {
        let policy = BucketPolicy {
            cleanup_interval: Duration::from_secs(10),
            ..BucketPolicy::per_second(1.0, 1)
        };
        let limiter = Arc::new(limiter_with(policy));
        let handle = limiter.spawn_sweeper(CancellationToken::new());
        drop(limiter);
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.await.unwrap();
    }

    #[test]
    fn disabled_limiter_passes_everything() {
        let mut config = RateLimitConfig::default();
        config.enabled = false;
        let limiter = RateLimiter::new(config);
        for _ in 0..100 {
            assert!(limiter.check(&fp("a")).is_ok());
        }
        assert!(limiter.is_empty());
    }
}
