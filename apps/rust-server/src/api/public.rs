// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Guest-facing wedding pages and RSVP collection.
//!
//! Anonymous callers see published pages only. When the optional auth gate
//! identifies the owner, their draft is served as a preview.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::{
    auth::{CallerIdentity, OptionalAuth},
    error::{ApiError, FieldError},
    models::{CreateRsvpRequest, PublicWedding, Rsvp, Wedding},
    state::AppState,
    store::InMemoryStore,
    validation::{rules::is_valid_slug, ValidatedJson},
};

fn visible_wedding(
    store: &InMemoryStore,
    slug: &str,
    caller: Option<&CallerIdentity>,
) -> Result<Wedding, ApiError> {
    if !is_valid_slug(slug) {
        return Err(ApiError::validation(vec![FieldError::new(
            "slug",
            "slug",
            "slug must be lowercase letters, digits and single hyphens",
        )]));
    }
    if let Some(wedding) = store.published_by_slug(slug) {
        return Ok(wedding.clone());
    }
    caller
        .and_then(|caller| store.draft_by_slug(slug, &caller.user_id))
        .cloned()
        .ok_or_else(|| ApiError::not_found("Wedding not found"))
}

#[utoipa::path(
    get,
    path = "/public/weddings/{slug}",
    tag = "Public",
    params(("slug" = String, Path, description = "Wedding page slug")),
    responses(
        (status = 200, body = PublicWedding),
        (status = 404, description = "No published wedding with this slug")
    )
)]
pub async fn get_public_wedding(
    State(state): State<AppState>,
    OptionalAuth(caller): OptionalAuth,
    Path(slug): Path<String>,
) -> Result<Json<PublicWedding>, ApiError> {
    let store = state.store.read().await;
    let wedding = visible_wedding(&store, &slug, caller.as_ref())?;
    Ok(Json(PublicWedding::from(&wedding)))
}

#[utoipa::path(
    post,
    path = "/public/weddings/{slug}/rsvp",
    request_body = CreateRsvpRequest,
    tag = "Public",
    params(("slug" = String, Path, description = "Wedding page slug")),
    responses(
        (status = 201, body = Rsvp),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "No published wedding with this slug")
    )
)]
pub async fn submit_rsvp(
    State(state): State<AppState>,
    OptionalAuth(caller): OptionalAuth,
    Path(slug): Path<String>,
    ValidatedJson(request): ValidatedJson<CreateRsvpRequest>,
) -> Result<(StatusCode, Json<Rsvp>), ApiError> {
    let mut store = state.store.write().await;
    let wedding = visible_wedding(&store, &slug, caller.as_ref())?;
    let rsvp = store.add_rsvp(&wedding.id, request);
    info!(
        wedding_id = %wedding.id,
        rsvp_id = %rsvp.id,
        attending = rsvp.attending,
        guests = rsvp.guests,
        "RSVP recorded"
    );
    Ok((StatusCode::CREATED, Json(rsvp)))
}
