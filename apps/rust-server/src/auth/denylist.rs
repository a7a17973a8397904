// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Denylist
//!
//! Revoked credential ids, consulted on every authenticated request.
//!
//! ## Backends
//!
//! | Variant | Use Case |
//! |---------|----------|
//! | [`Denylist::Memory`] | Tests and single-node deployments |
//! | [`Denylist::Redis`] | Shared across instances |
//!
//! The in-memory backend keeps entries without TTL and loses them on restart:
//! a revoked credential becomes usable again after a restart until it expires.
//! Use Redis whenever more than one process serves traffic or restarts happen
//! inside a credential lifetime.
//!
//! ## Redis Layout
//!
//! - `blacklist:access:<id>` / `blacklist:refresh:<id>`: tombstone, TTL-bound
//! - `refresh:<subject>:<session-id>`: refresh session metadata, enumerated by
//!   glob for bulk revocation

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::claims::CredentialKind;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DenylistError {
    #[error("denylist store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Denylist namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyKind {
    Access,
    Refresh,
}

impl DenyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyKind::Access => "access",
            DenyKind::Refresh => "refresh",
        }
    }
}

impl From<CredentialKind> for DenyKind {
    /// Verification credentials are consumed through the access namespace.
    fn from(kind: CredentialKind) -> Self {
        match kind {
            CredentialKind::Refresh => DenyKind::Refresh,
            CredentialKind::Access | CredentialKind::Verification => DenyKind::Access,
        }
    }
}

/// Stored alongside each live refresh session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub device_id: Option<String>,
    /// Unix seconds
    pub issued_at: i64,
}

/// Capability shared by every denylist backend.
pub trait DenylistStore: Send + Sync {
    /// True when `credential_id` is present in either namespace.
    fn is_denied(
        &self,
        credential_id: &str,
    ) -> impl Future<Output = Result<bool, DenylistError>> + Send;

    /// Record a tombstone. Returns `true` when this call created it.
    fn deny(
        &self,
        credential_id: &str,
        kind: DenyKind,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, DenylistError>> + Send;

    /// Deny every tracked refresh session of `subject` and drop the index.
    /// Returns the number of sessions revoked.
    fn revoke_all_for_subject(
        &self,
        subject: &str,
    ) -> impl Future<Output = Result<usize, DenylistError>> + Send;

    fn track_refresh_session(
        &self,
        subject: &str,
        session_id: &str,
        ttl: Duration,
        metadata: &SessionMetadata,
    ) -> impl Future<Output = Result<(), DenylistError>> + Send;

    fn forget_refresh_session(
        &self,
        subject: &str,
        session_id: &str,
    ) -> impl Future<Output = Result<(), DenylistError>> + Send;

    fn health_check(&self) -> impl Future<Output = Result<(), DenylistError>> + Send;
}

// =============================================================================
// In-memory backend
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    access: HashSet<String>,
    refresh: HashSet<String>,
    sessions: HashMap<String, HashMap<String, SessionMetadata>>,
}

/// Process-local denylist. Entries never expire and do not survive restarts.
#[derive(Debug, Clone, Default)]
pub struct MemoryDenylist {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryDenylist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.access.len() + inner.refresh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DenylistStore for MemoryDenylist {
    async fn is_denied(&self, credential_id: &str) -> Result<bool, DenylistError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.access.contains(credential_id) || inner.refresh.contains(credential_id))
    }

    async fn deny(
        &self,
        credential_id: &str,
        kind: DenyKind,
        _ttl: Duration,
    ) -> Result<bool, DenylistError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let set = match kind {
            DenyKind::Access => &mut inner.access,
            DenyKind::Refresh => &mut inner.refresh,
        };
        Ok(set.insert(credential_id.to_string()))
    }

    async fn revoke_all_for_subject(&self, subject: &str) -> Result<usize, DenylistError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sessions) = inner.sessions.remove(subject) else {
            return Ok(0);
        };
        let count = sessions.len();
        inner.refresh.extend(sessions.into_keys());
        Ok(count)
    }

    async fn track_refresh_session(
        &self,
        subject: &str,
        session_id: &str,
        _ttl: Duration,
        metadata: &SessionMetadata,
    ) -> Result<(), DenylistError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .sessions
            .entry(subject.to_string())
            .or_default()
            .insert(session_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn forget_refresh_session(
        &self,
        subject: &str,
        session_id: &str,
    ) -> Result<(), DenylistError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sessions) = inner.sessions.get_mut(subject) {
            sessions.remove(session_id);
            if sessions.is_empty() {
                inner.sessions.remove(subject);
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DenylistError> {
        Ok(())
    }
}

// =============================================================================
// Redis backend
// =============================================================================

/// Redis-backed denylist. Every call is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisDenylist {
    conn: ConnectionManager,
    timeout: Duration,
}

impl std::fmt::Debug for RedisDenylist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDenylist")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisDenylist {
    /// Connect to `url`. The initial connection is bounded by `timeout` too.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, DenylistError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| DenylistError::StoreUnavailable("connect timed out".to_string()))?
            .map_err(unavailable)?;
        info!("Connected to Redis denylist");
        Ok(Self::new(conn, timeout))
    }

    pub fn new(conn: ConnectionManager, timeout: Duration) -> Self {
        Self { conn, timeout }
    }

    fn denied_key(kind: DenyKind, credential_id: &str) -> String {
        format!("blacklist:{}:{credential_id}", kind.as_str())
    }

    fn session_key(subject: &str, session_id: &str) -> String {
        format!("refresh:{subject}:{session_id}")
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, DenylistError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, error = %e, "Denylist call failed");
                Err(unavailable(e))
            }
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Denylist call timed out");
                Err(DenylistError::StoreUnavailable(format!("{op} timed out")))
            }
        }
    }
}

impl DenylistStore for RedisDenylist {
    async fn is_denied(&self, credential_id: &str) -> Result<bool, DenylistError> {
        let mut conn = self.conn.clone();
        let keys = [
            Self::denied_key(DenyKind::Access, credential_id),
            Self::denied_key(DenyKind::Refresh, credential_id),
        ];
        let found: u64 = self.bounded("is_denied", conn.exists(&keys[..])).await?;
        Ok(found > 0)
    }

    async fn deny(
        &self,
        credential_id: &str,
        kind: DenyKind,
        ttl: Duration,
    ) -> Result<bool, DenylistError> {
        let mut conn = self.conn.clone();
        let key = Self::denied_key(kind, credential_id);
        let created: Option<String> = self
            .bounded(
                "deny",
                redis::cmd("SET")
                    .arg(&key)
                    .arg("1")
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn),
            )
            .await?;
        debug!(kind = kind.as_str(), credential_id, "Credential denied");
        Ok(created.is_some())
    }

    async fn revoke_all_for_subject(&self, subject: &str) -> Result<usize, DenylistError> {
        let mut conn = self.conn.clone();
        let prefix = Self::session_key(subject, "");
        let keys: Vec<String> = self
            .bounded("revoke_all.keys", conn.keys(format!("{prefix}*")))
            .await?;

        let mut revoked = 0;
        for key in &keys {
            let Some(session_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            let remaining: i64 = self.bounded("revoke_all.ttl", conn.ttl(key)).await?;
            let ttl = Duration::from_secs(remaining.max(1) as u64);
            self.deny(session_id, DenyKind::Refresh, ttl).await?;
            revoked += 1;
        }
        if !keys.is_empty() {
            let _: () = self.bounded("revoke_all.del", conn.del(&keys)).await?;
        }
        info!(subject, revoked, "Revoked all refresh sessions");
        Ok(revoked)
    }

    async fn track_refresh_session(
        &self,
        subject: &str,
        session_id: &str,
        ttl: Duration,
        metadata: &SessionMetadata,
    ) -> Result<(), DenylistError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(metadata).map_err(unavailable)?;
        let _: () = self
            .bounded(
                "track_session",
                redis::cmd("SET")
                    .arg(Self::session_key(subject, session_id))
                    .arg(value)
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn forget_refresh_session(
        &self,
        subject: &str,
        session_id: &str,
    ) -> Result<(), DenylistError> {
        let mut conn = self.conn.clone();
        let _: () = self
            .bounded(
                "forget_session",
                conn.del(Self::session_key(subject, session_id)),
            )
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DenylistError> {
        let mut conn = self.conn.clone();
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}

fn unavailable(err: impl std::fmt::Display) -> DenylistError {
    DenylistError::StoreUnavailable(err.to_string())
}

// =============================================================================
// Runtime selection
// =============================================================================

/// Backend chosen at startup.
#[derive(Debug, Clone)]
pub enum Denylist {
    Memory(MemoryDenylist),
    Redis(RedisDenylist),
}

impl Denylist {
    pub fn memory() -> Self {
        Self::Memory(MemoryDenylist::new())
    }

    /// Redis when `url` is set, otherwise in-memory.
    pub async fn from_url(url: Option<&str>, timeout: Duration) -> Result<Self, DenylistError> {
        match url {
            Some(url) => Ok(Self::Redis(RedisDenylist::connect(url, timeout).await?)),
            None => {
                warn!("REDIS_URL not set; using in-memory denylist (entries are lost on restart)");
                Ok(Self::memory())
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

impl DenylistStore for Denylist {
    async fn is_denied(&self, credential_id: &str) -> Result<bool, DenylistError> {
        match self {
            Self::Memory(b) => b.is_denied(credential_id).await,
            Self::Redis(b) => b.is_denied(credential_id).await,
        }
    }

    async fn deny(
        &self,
        credential_id: &str,
        kind: DenyKind,
        ttl: Duration,
    ) -> Result<bool, DenylistError> {
        match self {
            Self::Memory(b) => b.deny(credential_id, kind, ttl).await,
            Self::Redis(b) => b.deny(credential_id, kind, ttl).await,
        }
    }

    async fn revoke_all_for_subject(&self, subject: &str) -> Result<usize, DenylistError> {
        match self {
            Self::Memory(b) => b.revoke_all_for_subject(subject).await,
            Self::Redis(b) => b.revoke_all_for_subject(subject).await,
        }
    }

    async fn track_refresh_session(
        &self,
        subject: &str,
        session_id: &str,
        ttl: Duration,
        metadata: &SessionMetadata,
    ) -> Result<(), DenylistError> {
        match self {
            Self::Memory(b) => {
                b.track_refresh_session(subject, session_id, ttl, metadata)
                    .await
            }
            Self::Redis(b) => {
                b.track_refresh_session(subject, session_id, ttl, metadata)
                    .await
            }
        }
    }

    async fn forget_refresh_session(
        &self,
        subject: &str,
        session_id: &str,
    ) -> Result<(), DenylistError> {
        match self {
            Self::Memory(b) => b.forget_refresh_session(subject, session_id).await,
            Self::Redis(b) => b.forget_refresh_session(subject, session_id).await,
        }
    }

    async fn health_check(&self) -> Result<(), DenylistError> {
        match self {
            Self::Memory(b) => b.health_check().await,
            Self::Redis(b) => b.health_check().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn meta() -> SessionMetadata {
        SessionMetadata {
            device_id: Some("phone".to_string()),
            issued_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn absent_means_not_revoked() {
        let store = MemoryDenylist::new();
        assert!(!store.is_denied("nope").await.unwrap());
    }

    #[tokio::test]
    async fn either_namespace_denies() {
        let store = MemoryDenylist::new();
        store.deny("a", DenyKind::Access, TTL).await.unwrap();
        store.deny("r", DenyKind::Refresh, TTL).await.unwrap();
        assert!(store.is_denied("a").await.unwrap());
        assert!(store.is_denied("r").await.unwrap());
    }

    #[tokio::test]
    async fn repeated_deny_is_idempotent_and_reports_first_claim() {
        let store = MemoryDenylist::new();
        assert!(store.deny("x", DenyKind::Refresh, TTL).await.unwrap());
        assert!(!store.deny("x", DenyKind::Refresh, TTL).await.unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.is_denied("x").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_all_denies_tracked_sessions_only_for_subject() {
        let store = MemoryDenylist::new();
        store.track_refresh_session("alice", "s1", TTL, &meta()).await.unwrap();
        store.track_refresh_session("alice", "s2", TTL, &meta()).await.unwrap();
        store.track_refresh_session("bob", "s3", TTL, &meta()).await.unwrap();

        assert_eq!(store.revoke_all_for_subject("alice").await.unwrap(), 2);
        assert!(store.is_denied("s1").await.unwrap());
        assert!(store.is_denied("s2").await.unwrap());
        assert!(!store.is_denied("s3").await.unwrap());

        // Index was removed
        assert_eq!(store.revoke_all_for_subject("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn forgotten_session_is_not_revoked_in_bulk() {
        let store = MemoryDenylist::new();
        store.track_refresh_session("alice", "s1", TTL, &meta()).await.unwrap();
        store.forget_refresh_session("alice", "s1").await.unwrap();
        assert_eq!(store.revoke_all_for_subject("alice").await.unwrap(), 0);
        assert!(!store.is_denied("s1").await.unwrap());
    }

    #[tokio::test]
    async fn verification_is_consumed_through_access_namespace() {
        assert_eq!(DenyKind::from(CredentialKind::Verification), DenyKind::Access);
        assert_eq!(DenyKind::from(CredentialKind::Refresh), DenyKind::Refresh);
    }

    #[tokio::test]
    async fn enum_dispatches_to_memory() {
        let store = Denylist::from_url(None, TTL).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
        store.deny("x", DenyKind::Access, TTL).await.unwrap();
        assert!(store.is_denied("x").await.unwrap());
        assert!(store.health_check().await.is_ok());
    }

    async fn redis_store() -> Option<RedisDenylist> {
        let url = std::env::var("REDIS_URL").ok()?;
        match RedisDenylist::connect(&url, Duration::from_secs(2)).await {
            Ok(store) => Some(store),
            Err(e) => {
                eprintln!("Skipping test - Redis not available: {e}");
                None
            }
        }
    }

    #[tokio::test]
    async fn redis_deny_claims_once() {
        let Some(store) = redis_store().await else {
            return;
        };
        let id = uuid::Uuid::new_v4().to_string();
        assert!(!store.is_denied(&id).await.unwrap());
        assert!(store.deny(&id, DenyKind::Refresh, TTL).await.unwrap());
        assert!(!store.deny(&id, DenyKind::Refresh, TTL).await.unwrap());
        assert!(store.is_denied(&id).await.unwrap());
    }

    #[tokio::test]
    async fn redis_revoke_all_for_subject() {
        let Some(store) = redis_store().await else {
            return;
        };
        let subject = uuid::Uuid::new_v4().to_string();
        let session = uuid::Uuid::new_v4().to_string();
        store
            .track_refresh_session(&subject, &session, TTL, &meta())
            .await
            .unwrap();
        assert_eq!(store.revoke_all_for_subject(&subject).await.unwrap(), 1);
        assert!(store.is_denied(&session).await.unwrap());
        assert_eq!(store.revoke_all_for_subject(&subject).await.unwrap(), 0);
    }
}
