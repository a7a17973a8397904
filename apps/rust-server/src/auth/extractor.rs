// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the caller identity.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(caller): Auth) -> impl IntoResponse {
//!     // caller is CallerIdentity
//! }
//! ```
//!
//! When a gate middleware already ran, the identity it attached is reused;
//! otherwise the extractor runs the same checks itself.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::{middleware::authenticate, AuthError, CallerIdentity, Role};
use crate::state::AppState;

/// Authenticated caller. Rejects with 401 when absent or invalid.
#[derive(Debug, Clone)]
pub struct Auth(pub CallerIdentity);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<CallerIdentity>().cloned() {
            return Ok(Auth(identity));
        }
        let identity = authenticate(state, &parts.headers).await?;
        parts.extensions.insert(identity.clone());
        Ok(Auth(identity))
    }
}

/// Caller when one could be authenticated, `None` otherwise. Never rejects.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<CallerIdentity>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<CallerIdentity>().cloned() {
            return Ok(OptionalAuth(Some(identity)));
        }
        Ok(OptionalAuth(authenticate(state, &parts.headers).await.ok()))
    }
}

/// Authenticated caller holding the admin role.
///
/// ```rust,ignore
/// async fn stats(AdminOnly(admin): AdminOnly) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone)]
pub struct AdminOnly(pub CallerIdentity);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(identity) = Auth::from_request_parts(parts, state).await?;
        if !identity.has_role(Role::Admin) {
            return Err(AuthError::InsufficientPermissions);
        }
        Ok(AdminOnly(identity))
    }
}
