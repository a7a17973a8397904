// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use tracing::debug;

use crate::{
    error::ApiError,
    models::{AnalyticsEventRequest, EventAccepted},
    state::AppState,
    validation::ValidatedJson,
};

/// Count a page interaction. Events for unknown weddings are rejected so the
/// counters cannot be filled with arbitrary keys.
#[utoipa::path(
    post,
    path = "/analytics/events",
    request_body = AnalyticsEventRequest,
    tag = "Analytics",
    responses(
        (status = 202, body = EventAccepted),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Wedding not found"),
        (status = 429, description = "Rate limit exceeded")
    )
)]
pub async fn record_event(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<AnalyticsEventRequest>,
) -> Result<(StatusCode, Json<EventAccepted>), ApiError> {
    let mut store = state.store.write().await;
    if store.wedding(&request.wedding_id).is_none() {
        return Err(ApiError::not_found("Wedding not found"));
    }
    store.record_event(&request.wedding_id, request.event);
    debug!(wedding_id = %request.wedding_id, event = ?request.event, "Analytics event recorded");
    Ok((StatusCode::ACCEPTED, Json(EventAccepted { accepted: true })))
}
