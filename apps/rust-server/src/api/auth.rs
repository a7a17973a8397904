// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account and session endpoints.
//!
//! - Registration creates an `unverified` user and returns a credential pair
//! - Login requires an `active` account and also sets the `access_token` cookie
//! - Refresh rotates the pair. Denying the presented refresh credential is
//!   the atomic claim: only the request that creates the tombstone receives a
//!   new pair
//! - Logout denies the access credential and, when supplied, the refresh one
//! - Password reset ids are single use, valid for one hour, stored as digests

use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    auth::{
        denylist::{DenyKind, DenylistError, DenylistStore, SessionMetadata},
        middleware::ACCESS_COOKIE,
        password::{hash_password, verify_password},
        tokens::{remaining_lifetime, IssuedPair},
        Auth, AuthError, CallerIdentity, Claims, Role,
    },
    error::{ApiError, ErrorCode},
    models::{
        ForgotPasswordRequest, LoginRequest, LogoutRequest, MessageResponse, RefreshRequest,
        RegisterRequest, RegisterResponse, ResetPasswordRequest, TokenResponse, UserProfile,
        UserStatus, VerifyEmailQuery,
    },
    state::AppState,
    validation::{rules::check_password_strength, ValidatedJson, ValidatedQuery},
};

fn store_unavailable(err: DenylistError) -> ApiError {
    ApiError::from_code(ErrorCode::ServiceUnavailable).with_internal(err)
}

fn token_response(state: &AppState, pair: &IssuedPair) -> TokenResponse {
    TokenResponse {
        access_token: pair.access_token.clone(),
        refresh_token: pair.refresh_token.clone(),
        token_type: "Bearer".to_string(),
        expires_in: state.credentials.access_ttl().as_secs(),
    }
}

fn access_cookie(token: String) -> Cookie<'static> {
    Cookie::build((ACCESS_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Remaining lifetime of the caller's access credential, at least one second.
fn caller_ttl(caller: &CallerIdentity) -> Duration {
    let secs = caller.expires_at - Utc::now().timestamp();
    Duration::from_secs(secs.max(1) as u64)
}

/// Mint a pair and index the refresh credential for bulk revocation.
async fn start_session(
    state: &AppState,
    subject: &str,
    device: Option<&str>,
    role: Role,
) -> Result<IssuedPair, ApiError> {
    let pair = state
        .credentials
        .issue_pair(subject, device, role)
        .map_err(ApiError::internal)?;
    let metadata = SessionMetadata {
        device_id: device.map(str::to_string),
        issued_at: Utc::now().timestamp(),
    };
    if let Err(err) = state
        .denylist
        .track_refresh_session(subject, &pair.refresh_id, state.credentials.refresh_ttl(), &metadata)
        .await
    {
        warn!(subject, error = %err, "Could not index refresh session");
    }
    Ok(pair)
}

fn weak_password(message: &str) -> ApiError {
    ApiError::new(ErrorCode::WeakPassword, message)
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "Auth",
    responses(
        (status = 201, body = RegisterResponse),
        (status = 400, description = "Validation failed or weak password"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    check_password_strength(&request.password).map_err(weak_password)?;
    let password_hash = hash_password(&request.password).map_err(ApiError::internal)?;

    let user = state.store.write().await.create_user(
        &request.first_name,
        &request.last_name,
        &request.email,
        password_hash,
        Role::User,
    )?;

    let pair = start_session(&state, &user.id, None, user.role).await?;
    let verification = state
        .credentials
        .issue_verification(&user.id)
        .map_err(ApiError::internal)?;
    // Delivery is handled outside this service.
    debug!(user_id = %user.id, verification_token = %verification, "Verification credential issued");
    info!(user_id = %user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserProfile::from(&user),
            tokens: token_response(&state, &pair),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "Auth",
    responses(
        (status = 200, body = TokenResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account locked or email not verified"),
        (status = 429, description = "Too many failed attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, Json<TokenResponse>), ApiError> {
    let invalid = || ApiError::new(ErrorCode::InvalidCredentials, "Invalid email or password");

    let user = state
        .store
        .read()
        .await
        .user_by_email(&request.email)
        .cloned()
        .ok_or_else(invalid)?;
    if !verify_password(&request.password, &user.password_hash).map_err(ApiError::internal)? {
        return Err(invalid());
    }
    match user.status {
        UserStatus::Locked => {
            return Err(ApiError::new(ErrorCode::AccountLocked, "Account is locked"));
        }
        UserStatus::Unverified => {
            return Err(ApiError::new(
                ErrorCode::EmailNotVerified,
                "Email address has not been verified",
            ));
        }
        UserStatus::Active => {}
    }

    let pair = start_session(&state, &user.id, request.device_id.as_deref(), user.role).await?;
    info!(user_id = %user.id, "User logged in");
    let jar = jar.add(access_cookie(pair.access_token.clone()));
    Ok((jar, Json(token_response(&state, &pair))))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    tag = "Auth",
    responses(
        (status = 200, body = TokenResponse),
        (status = 401, description = "Refresh credential invalid or already used")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let claims = state
        .credentials
        .verify(&request.refresh_token)
        .map_err(AuthError::from)?;
    let Claims::Refresh { registered, device_id } = &claims else {
        return Err(AuthError::WrongCredentialKind.into());
    };

    let claimed = state
        .denylist
        .deny(
            &registered.jti,
            DenyKind::Refresh,
            remaining_lifetime(&claims, Utc::now()),
        )
        .await
        .map_err(|e| AuthError::StoreUnavailable(e.to_string()))?;
    if !claimed {
        warn!(subject = %registered.sub, credential_id = %registered.jti, "Refresh credential reused");
        return Err(AuthError::Revoked.into());
    }
    if let Err(err) = state
        .denylist
        .forget_refresh_session(&registered.sub, &registered.jti)
        .await
    {
        warn!(subject = %registered.sub, error = %err, "Could not drop rotated refresh session");
    }

    let user = state
        .store
        .read()
        .await
        .user(&registered.sub)
        .cloned()
        .ok_or(AuthError::Unauthenticated)?;
    if user.status == UserStatus::Locked {
        return Err(ApiError::new(ErrorCode::AccountLocked, "Account is locked"));
    }

    let pair = start_session(&state, &user.id, device_id.as_deref(), user.role).await?;
    Ok(Json(token_response(&state, &pair)))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body(content = LogoutRequest, description = "Optional; may be omitted"),
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, body = MessageResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    Auth(caller): Auth,
    jar: CookieJar,
    body: Option<ValidatedJson<LogoutRequest>>,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    state
        .denylist
        .deny(&caller.credential_id, DenyKind::Access, caller_ttl(&caller))
        .await
        .map_err(store_unavailable)?;

    let refresh_token = body.and_then(|ValidatedJson(b)| b.refresh_token);
    if let Some(token) = refresh_token {
        match state.credentials.verify(&token) {
            Ok(claims @ Claims::Refresh { .. }) if claims.subject() == caller.user_id => {
                state
                    .denylist
                    .deny(
                        claims.id(),
                        DenyKind::Refresh,
                        remaining_lifetime(&claims, Utc::now()),
                    )
                    .await
                    .map_err(store_unavailable)?;
                if let Err(err) = state
                    .denylist
                    .forget_refresh_session(&caller.user_id, claims.id())
                    .await
                {
                    warn!(subject = %caller.user_id, error = %err, "Could not drop refresh session");
                }
            }
            Ok(_) => debug!(subject = %caller.user_id, "Ignoring foreign refresh credential on logout"),
            Err(err) => debug!(subject = %caller.user_id, reason = %err, "Ignoring unusable refresh credential on logout"),
        }
    }

    info!(user_id = %caller.user_id, "User logged out");
    let mut removal = Cookie::build((ACCESS_COOKIE, "")).path("/").build();
    removal.make_removal();
    let jar = jar.add(removal);
    Ok((jar, Json(MessageResponse::new("Logged out"))))
}

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    tag = "Auth",
    responses((status = 200, body = MessageResponse))
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ForgotPasswordRequest>,
) -> Json<MessageResponse> {
    let mut store = state.store.write().await;
    let user = store
        .user_by_email(&request.email)
        .filter(|u| u.status != UserStatus::Locked)
        .map(|u| u.id.clone());
    if let Some(user_id) = user {
        let token = store.issue_reset(&user_id, Utc::now());
        // Delivery is handled outside this service.
        debug!(user_id = %user_id, reset_token = %token, "Password reset issued");
    }
    Json(MessageResponse::new(
        "If the address is registered, a reset link has been sent",
    ))
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    tag = "Auth",
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, description = "Weak password"),
        (status = 401, description = "Reset id unknown, used or expired")
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    check_password_strength(&request.password).map_err(weak_password)?;
    let password_hash = hash_password(&request.password).map_err(ApiError::internal)?;

    let user_id = {
        let mut store = state.store.write().await;
        let user_id = store.consume_reset(&request.token, Utc::now())?;
        store.set_password_hash(&user_id, password_hash)?;
        user_id
    };

    let revoked = state
        .denylist
        .revoke_all_for_subject(&user_id)
        .await
        .map_err(store_unavailable)?;
    info!(user_id = %user_id, revoked_sessions = revoked, "Password reset");
    Ok(Json(MessageResponse::new("Password updated")))
}

#[utoipa::path(
    get,
    path = "/auth/verify-email",
    params(VerifyEmailQuery),
    tag = "Auth",
    responses(
        (status = 200, body = UserProfile),
        (status = 401, description = "Verification credential invalid or already used")
    )
)]
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<VerifyEmailQuery>,
) -> Result<Json<UserProfile>, ApiError> {
    let claims = state
        .credentials
        .verify(&query.token)
        .map_err(AuthError::from)?;
    if !matches!(claims, Claims::Verification { .. }) {
        return Err(AuthError::WrongCredentialKind.into());
    }

    let claimed = state
        .denylist
        .deny(
            claims.id(),
            DenyKind::from(claims.kind()),
            remaining_lifetime(&claims, Utc::now()),
        )
        .await
        .map_err(|e| AuthError::StoreUnavailable(e.to_string()))?;
    if !claimed {
        return Err(AuthError::Revoked.into());
    }

    let mut store = state.store.write().await;
    let status = store
        .user(claims.subject())
        .map(|u| u.status)
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if status == UserStatus::Locked {
        return Err(ApiError::new(ErrorCode::AccountLocked, "Account is locked"));
    }
    let user = store.set_status(claims.subject(), UserStatus::Active)?;
    info!(user_id = %user.id, "Email verified");
    Ok(Json(UserProfile::from(&user)))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, body = CallerIdentity),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(Auth(caller): Auth) -> Json<CallerIdentity> {
    Json(caller)
}
