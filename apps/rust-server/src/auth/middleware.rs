// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Auth and role gates.
//!
//! ## Flow
//!
//! 1. Take the credential from `Authorization: Bearer <token>`, falling back
//!    to the `access_token` cookie
//! 2. Verify it with the [`CredentialService`](super::CredentialService);
//!    only access credentials identify a caller
//! 3. Consult the denylist by credential id. A store outage fails closed
//! 4. Attach the [`CallerIdentity`] to the request extensions
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/weddings", get(list_weddings))
//!     .route_layer(from_fn_with_state(state.clone(), require_auth));
//! ```

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use super::{denylist::DenylistStore, AuthError, CallerIdentity, Role};
use crate::state::AppState;

/// Cookie carrying the access credential for browser clients.
pub const ACCESS_COOKIE: &str = "access_token";

/// Bearer token first, then the access cookie.
pub fn extract_credential(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    CookieJar::from_headers(headers)
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

/// Verify the request's credential and check it against the denylist.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<CallerIdentity, AuthError> {
    let token = extract_credential(headers).ok_or(AuthError::MissingCredential)?;
    let claims = state.credentials.verify(&token)?;
    let identity = CallerIdentity::from_claims(&claims).ok_or(AuthError::WrongCredentialKind)?;

    match state.denylist.is_denied(&identity.credential_id).await {
        Ok(false) => Ok(identity),
        Ok(true) => {
            warn!(
                subject = %identity.user_id,
                credential_id = %identity.credential_id,
                "Revoked credential presented"
            );
            Err(AuthError::Revoked)
        }
        Err(err) => Err(AuthError::StoreUnavailable(err.to_string())),
    }
}

/// Middleware: reject requests without a valid, unrevoked access credential.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    match authenticate(&state, request.headers()).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            debug!(
                path = %request.uri().path(),
                reason = %err,
                "Authentication failed"
            );
            err.into_response()
        }
    }
}

/// Middleware: attach the caller when a valid credential is present, continue
/// anonymously otherwise.
pub async fn optional_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    match authenticate(&state, request.headers()).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
        }
        Err(AuthError::MissingCredential) => {}
        Err(err) => debug!(reason = %err, "Ignoring unusable credential on optional route"),
    }
    next.run(request).await
}

/// Middleware body for the role gate. Runs after [`require_auth`].
///
/// ```rust,ignore
/// .route_layer(from_fn(|req: Request, next: Next| require_role(Role::Admin, req, next)))
/// ```
pub async fn require_role(required: Role, request: Request, next: Next) -> Response {
    let Some(identity) = request.extensions().get::<CallerIdentity>() else {
        return AuthError::Unauthenticated.into_response();
    };
    if !identity.has_role(required) {
        warn!(
            subject = %identity.user_id,
            role = %identity.role,
            required = %required,
            path = %request.uri().path(),
            "Caller lacks required role"
        );
        return AuthError::InsufficientPermissions.into_response();
    }
    next.run(request).await
}
