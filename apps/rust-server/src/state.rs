// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state.
//!
//! Every process-wide component is built once here and injected into handlers
//! and middleware through axum's `State`.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{
    denylist::{Denylist, DenylistError},
    keys::{KeyError, KeyPair},
    CredentialService,
};
use crate::config::AppConfig;
use crate::security::{AbuseGuard, CorsPolicy, RateLimiter, SecurityHeaders};
use crate::store::InMemoryStore;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("signing keys: {0}")]
    Keys(#[from] KeyError),
    #[error("denylist: {0}")]
    Denylist(#[from] DenylistError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub credentials: Arc<CredentialService>,
    pub denylist: Denylist,
    pub rate_limiter: Arc<RateLimiter>,
    pub abuse_guard: Arc<AbuseGuard>,
    pub security_headers: Arc<SecurityHeaders>,
    pub cors: Arc<CorsPolicy>,
    pub store: Arc<RwLock<InMemoryStore>>,
    pub started_at: Instant,
}

impl AppState {
    /// Load keys and connect the denylist backend.
    ///
    /// Without a configured private key an ephemeral Ed25519 pair is
    /// generated; credentials it signs die with the process.
    pub async fn new(config: AppConfig) -> Result<Self, StateError> {
        let keys = match config.auth.private_key_pem.as_deref() {
            Some(private_pem) => KeyPair::from_pem(
                &config.auth.algorithm,
                private_pem,
                config.auth.public_key_pem.as_deref(),
            )?,
            None => {
                warn!("JWT_PRIVATE_KEY_PEM not set; generating an ephemeral Ed25519 keypair");
                KeyPair::generate_ed25519()?.0
            }
        };
        info!(algorithm = ?keys.algorithm(), "Credential signing keys loaded");

        let denylist =
            Denylist::from_url(config.redis_url.as_deref(), config.denylist_timeout).await?;
        info!(backend = denylist.backend_name(), "Denylist ready");

        Ok(Self::from_parts(config, keys, denylist))
    }

    pub fn from_parts(config: AppConfig, keys: KeyPair, denylist: Denylist) -> Self {
        Self {
            credentials: Arc::new(CredentialService::new(keys, &config.auth)),
            denylist,
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            abuse_guard: Arc::new(AbuseGuard::new(config.brute_force.clone())),
            security_headers: Arc::new(SecurityHeaders::from_config(&config.security_headers)),
            cors: Arc::new(CorsPolicy::from_config(&config.cors)),
            store: Arc::new(RwLock::new(InMemoryStore::new())),
            started_at: Instant::now(),
            config: Arc::new(config),
        }
    }

    /// Start the rate-limit and abuse-guard sweepers. Both stop when
    /// `shutdown` is cancelled or their component is dropped.
    pub fn spawn_sweepers(&self, shutdown: &CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.rate_limiter.spawn_sweeper(shutdown.clone()),
            self.abuse_guard.spawn_sweeper(shutdown.clone()),
        ]
    }

    /// Fresh keys and an in-memory denylist.
    #[cfg(test)]
    pub async fn for_tests(config: AppConfig) -> Self {
        let (keys, _) = KeyPair::generate_ed25519().expect("generate test keys");
        Self::from_parts(config, keys, Denylist::memory())
    }
}
