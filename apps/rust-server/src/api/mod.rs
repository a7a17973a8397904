// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::Request,
    middleware::{from_fn, from_fn_with_state, Next},
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{
        middleware::{optional_auth, require_auth, require_role},
        CallerIdentity, Role,
    },
    error::{ApiError, ErrorCode, FieldError},
    funnel::{error_funnel, panic_response},
    models::{
        AnalyticsEvent, AnalyticsEventRequest, CreateRsvpRequest, CreateWeddingRequest,
        EventAccepted, ForgotPasswordRequest, LoginRequest, LogoutRequest, MessageResponse,
        PublicWedding, RefreshRequest, RegisterRequest, RegisterResponse, ResetPasswordRequest,
        Rsvp, RsvpListResponse, Theme, TokenResponse, UpdateWeddingRequest, UserProfile,
        UserStatus, Wedding, WeddingListResponse,
    },
    security::{
        brute_force::abuse_guard, cors::cors, headers::security_headers, rate_limit::rate_limit,
        sanitize::sanitize,
    },
    state::AppState,
};

pub mod admin;
pub mod analytics;
pub mod auth;
pub mod health;
pub mod public;
pub mod weddings;

/// Build the application with the full request-security pipeline.
///
/// Layers, outermost first: request id, security headers, tracing, error
/// funnel, panic recovery, CORS, sanitizer, rate limiter, abuse guard. Auth
/// and role gates are attached per route group.
pub fn router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let auth_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/verify-email", get(auth::verify_email));

    let session_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    // route_layer order: the last one added runs first
    let wedding_routes = Router::new()
        .route(
            "/weddings",
            get(weddings::list_weddings).post(weddings::create_wedding),
        )
        .route(
            "/weddings/{id}",
            get(weddings::get_wedding).patch(weddings::update_wedding),
        )
        .route("/weddings/{id}/rsvps", get(weddings::list_rsvps))
        .route_layer(from_fn(|req: Request, next: Next| {
            require_role(Role::User, req, next)
        }))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let public_routes = Router::new()
        .route("/public/weddings/{slug}", get(public::get_public_wedding))
        .route("/public/weddings/{slug}/rsvp", post(public::submit_rsvp))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    let analytics_routes =
        Router::new().route("/analytics/events", post(analytics::record_event));

    let admin_routes = Router::new()
        .route("/admin/stats", get(admin::get_stats))
        .route("/admin/users/{id}/lock", post(admin::lock_user))
        .route_layer(from_fn(|req: Request, next: Next| {
            require_role(Role::Admin, req, next)
        }))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let app = Router::new()
        .merge(health_routes)
        .merge(auth_routes)
        .merge(session_routes)
        .merge(wedding_routes)
        .merge(public_routes)
        .merge(analytics_routes)
        .merge(admin_routes)
        .with_state(state.clone());

    Router::new()
        .merge(app)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .fallback(route_not_found)
        .layer(from_fn_with_state(state.clone(), abuse_guard))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn(sanitize))
        .layer(from_fn_with_state(state.clone(), cors))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn_with_state(state.clone(), error_funnel))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(from_fn_with_state(state, security_headers))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wedding Invitations API",
        description = "Couple accounts, wedding pages, guest RSVPs and analytics."
    ),
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::register,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::forgot_password,
        auth::reset_password,
        auth::verify_email,
        auth::me,
        weddings::list_weddings,
        weddings::create_wedding,
        weddings::get_wedding,
        weddings::update_wedding,
        weddings::list_rsvps,
        public::get_public_wedding,
        public::submit_rsvp,
        analytics::record_event,
        admin::get_stats,
        admin::lock_user
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            admin::SystemStatsResponse,
            admin::LockUserResponse,
            CallerIdentity,
            Role,
            ErrorCode,
            FieldError,
            RegisterRequest,
            RegisterResponse,
            LoginRequest,
            RefreshRequest,
            LogoutRequest,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            TokenResponse,
            MessageResponse,
            UserProfile,
            UserStatus,
            Theme,
            Wedding,
            PublicWedding,
            CreateWeddingRequest,
            UpdateWeddingRequest,
            WeddingListResponse,
            Rsvp,
            CreateRsvpRequest,
            RsvpListResponse,
            AnalyticsEvent,
            AnalyticsEventRequest,
            EventAccepted
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Accounts, sessions and credential rotation"),
        (name = "Weddings", description = "Wedding management for owners"),
        (name = "Public", description = "Guest-facing pages and RSVPs"),
        (name = "Analytics", description = "Page interaction counters"),
        (name = "Admin", description = "Operational tooling")
    )
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}
