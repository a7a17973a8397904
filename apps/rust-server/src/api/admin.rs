// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints for system management.
//!
//! These endpoints sit behind the auth gate and the `admin` role gate and
//! provide:
//! - System statistics, including the live size of the limiter tables
//! - Account locking

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    auth::{denylist::DenylistStore, AdminOnly},
    error::{ApiError, ErrorCode, FieldError},
    models::{UserProfile, UserStatus},
    state::AppState,
    validation::rules::is_valid_object_id,
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// System statistics response.
#[derive(Debug, Serialize, ToSchema)]
pub struct SystemStatsResponse {
    pub total_users: usize,
    pub total_weddings: usize,
    pub total_rsvps: usize,
    pub total_analytics_events: u64,
    /// Token buckets currently held by the rate limiter.
    pub rate_limit_buckets: usize,
    /// Identifiers tracked by the abuse guard.
    pub abuse_records: usize,
    /// Denylist backend in use (`memory` or `redis`).
    pub denylist_backend: String,
    pub uptime_seconds: u64,
    /// Current timestamp (RFC 3339).
    pub timestamp: String,
}

/// Result of locking an account.
#[derive(Debug, Serialize, ToSchema)]
pub struct LockUserResponse {
    pub user: UserProfile,
    /// Refresh sessions revoked by the lock.
    pub revoked_sessions: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get system statistics.
#[utoipa::path(
    get,
    path = "/admin/stats",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "System statistics", body = SystemStatsResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn get_stats(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
) -> Json<SystemStatsResponse> {
    let counts = state.store.read().await.counts();
    Json(SystemStatsResponse {
        total_users: counts.users,
        total_weddings: counts.weddings,
        total_rsvps: counts.rsvps,
        total_analytics_events: counts.analytics_events,
        rate_limit_buckets: state.rate_limiter.len(),
        abuse_records: state.abuse_guard.len(),
        denylist_backend: state.denylist.backend_name().to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Lock an account and revoke all of its refresh sessions.
///
/// Access credentials already issued stay valid until they expire.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/lock",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "User id (24 hex characters)")),
    responses(
        (status = 200, description = "Account locked", body = LockUserResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "User not found"),
        (status = 503, description = "Denylist unavailable")
    )
)]
pub async fn lock_user(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<LockUserResponse>, ApiError> {
    if !is_valid_object_id(&user_id) {
        return Err(ApiError::validation(vec![FieldError::new(
            "id",
            "object_id",
            "id must be 24 hexadecimal characters",
        )]));
    }
    let user = state
        .store
        .write()
        .await
        .set_status(&user_id, UserStatus::Locked)?;

    let revoked_sessions = state
        .denylist
        .revoke_all_for_subject(&user_id)
        .await
        .map_err(|e| {
            warn!(subject = %user_id, error = %e, "Account locked but sessions not revoked");
            ApiError::from_code(ErrorCode::ServiceUnavailable).with_internal(e)
        })?;

    info!(
        admin = %admin.user_id,
        subject = %user_id,
        revoked_sessions,
        "Account locked"
    );
    Ok(Json(LockUserResponse {
        user: UserProfile::from(&user),
        revoked_sessions,
    }))
}
