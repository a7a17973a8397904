// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wedding management for the couple that owns the page.
//!
//! Every route sits behind the auth gate and the `user` role gate. Only the
//! owner (or an admin) may read or change a wedding.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::{info, warn};

use crate::{
    auth::CallerIdentity,
    error::{ApiError, FieldError},
    models::{
        CreateWeddingRequest, RsvpListResponse, UpdateWeddingRequest, Wedding,
        WeddingListResponse,
    },
    state::AppState,
    validation::{rules::is_valid_object_id, ValidatedJson},
};

fn check_id(id: &str) -> Result<(), ApiError> {
    if is_valid_object_id(id) {
        Ok(())
    } else {
        Err(ApiError::validation(vec![FieldError::new(
            "id",
            "object_id",
            "id must be 24 hexadecimal characters",
        )]))
    }
}

/// Load a wedding the caller may act on.
async fn owned_wedding(
    state: &AppState,
    caller: &CallerIdentity,
    id: &str,
) -> Result<Wedding, ApiError> {
    check_id(id)?;
    let wedding = state
        .store
        .read()
        .await
        .wedding(id)
        .cloned()
        .ok_or_else(|| ApiError::not_found("Wedding not found"))?;
    if wedding.owner_id != caller.user_id && !caller.is_admin() {
        warn!(subject = %caller.user_id, wedding_id = %id, "Access to foreign wedding denied");
        return Err(ApiError::forbidden(
            "You don't have permission to access this wedding",
        ));
    }
    Ok(wedding)
}

#[utoipa::path(
    get,
    path = "/weddings",
    tag = "Weddings",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, body = WeddingListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_weddings(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> Json<WeddingListResponse> {
    let weddings = state.store.read().await.weddings_for(&caller.user_id);
    Json(WeddingListResponse {
        total: weddings.len(),
        weddings,
    })
}

#[utoipa::path(
    post,
    path = "/weddings",
    request_body = CreateWeddingRequest,
    tag = "Weddings",
    security(("bearer_auth" = [])),
    responses(
        (status = 201, body = Wedding),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Slug already taken")
    )
)]
pub async fn create_wedding(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    ValidatedJson(request): ValidatedJson<CreateWeddingRequest>,
) -> Result<(StatusCode, Json<Wedding>), ApiError> {
    let wedding = state
        .store
        .write()
        .await
        .create_wedding(&caller.user_id, request)?;
    info!(wedding_id = %wedding.id, owner = %caller.user_id, slug = %wedding.slug, "Wedding created");
    Ok((StatusCode::CREATED, Json(wedding)))
}

#[utoipa::path(
    get,
    path = "/weddings/{id}",
    tag = "Weddings",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Wedding id (24 hex characters)")),
    responses(
        (status = 200, body = Wedding),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Wedding not found")
    )
)]
pub async fn get_wedding(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> Result<Json<Wedding>, ApiError> {
    owned_wedding(&state, &caller, &id).await.map(Json)
}

#[utoipa::path(
    patch,
    path = "/weddings/{id}",
    request_body = UpdateWeddingRequest,
    tag = "Weddings",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Wedding id (24 hex characters)")),
    responses(
        (status = 200, body = Wedding),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Wedding not found"),
        (status = 409, description = "Slug already taken")
    )
)]
pub async fn update_wedding(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<UpdateWeddingRequest>,
) -> Result<Json<Wedding>, ApiError> {
    owned_wedding(&state, &caller, &id).await?;
    let wedding = state.store.write().await.update_wedding(&id, request)?;
    info!(wedding_id = %wedding.id, "Wedding updated");
    Ok(Json(wedding))
}

#[utoipa::path(
    get,
    path = "/weddings/{id}/rsvps",
    tag = "Weddings",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Wedding id (24 hex characters)")),
    responses(
        (status = 200, body = RsvpListResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Wedding not found")
    )
)]
pub async fn list_rsvps(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> Result<Json<RsvpListResponse>, ApiError> {
    owned_wedding(&state, &caller, &id).await?;
    let rsvps = state.store.read().await.rsvps_for(&id);
    let attending: Vec<_> = rsvps.iter().filter(|r| r.attending).collect();
    let headcount: usize = attending.iter().map(|r| 1 + usize::from(r.guests)).sum();
    Ok(Json(RsvpListResponse {
        total: rsvps.len(),
        attending: attending.len(),
        headcount,
        rsvps,
    }))
}
