// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response structures used by the REST API. Request types
//! derive [`Validate`] so the validating extractors can check them after
//! binding; responses derive `ToSchema` for the OpenAPI document.
//!
//! ## Model Categories
//!
//! - **Accounts**: registration, login and credential responses
//! - **Weddings**: a couple's wedding page and its settings
//! - **RSVPs**: guest responses collected from the public page
//! - **Analytics**: page beacons

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::auth::Role;

// =============================================================================
// Accounts
// =============================================================================

/// Account lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Registered, email not yet confirmed
    Unverified,
    Active,
    /// Disabled by an administrator
    Locked,
}

/// Stored account. The password hash never leaves the store.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    /// Normalized (NFKC, trimmed, lowercase)
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

/// Public view of an account.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            role: user.role,
            status: user.status,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 50))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 50))]
    pub last_name: String,
    #[serde(default)]
    #[validate(email, length(max = 254))]
    pub email: String,
    /// Strength is checked by the handler and reported as `WEAK_PASSWORD`
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(email, length(max = 254))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub password: String,
    /// Client-chosen device label carried in both credentials
    #[serde(default)]
    #[validate(length(max = 64))]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct RefreshRequest {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct LogoutRequest {
    /// Refresh credential of the same session, revoked alongside the access one
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    #[validate(email, length(max = 254))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct ResetPasswordRequest {
    /// Reset id delivered out of band
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub token: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct VerifyEmailQuery {
    /// Verification credential
    #[serde(default)]
    #[validate(length(min = 1))]
    pub token: String,
}

/// Credentials returned by login and refresh.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access credential lifetime in seconds
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user: UserProfile,
    pub tokens: TokenResponse,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// Weddings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Classic,
    Modern,
    Rustic,
    Garden,
}

/// A couple's wedding page.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Wedding {
    pub id: String,
    pub owner_id: String,
    pub slug: String,
    pub title: String,
    pub partner_one: String,
    pub partner_two: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub theme: Theme,
    /// Visible on the public page when set
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What guests see on the public page.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicWedding {
    pub slug: String,
    pub title: String,
    pub partner_one: String,
    pub partner_two: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub theme: Theme,
}

impl From<&Wedding> for PublicWedding {
    fn from(wedding: &Wedding) -> Self {
        Self {
            slug: wedding.slug.clone(),
            title: wedding.title.clone(),
            partner_one: wedding.partner_one.clone(),
            partner_two: wedding.partner_two.clone(),
            website_url: wedding.website_url.clone(),
            description: wedding.description.clone(),
            theme: wedding.theme,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct CreateWeddingRequest {
    #[serde(default)]
    #[validate(custom(function = "crate::validation::rules::validate_slug"))]
    pub slug: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 60))]
    pub partner_one: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 60))]
    pub partner_two: String,
    #[serde(default)]
    #[validate(custom(function = "crate::validation::rules::validate_url"))]
    pub website_url: Option<String>,
    #[serde(default)]
    #[validate(
        length(max = 5000),
        custom(function = "crate::validation::rules::validate_safe_html")
    )]
    pub description: Option<String>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub published: bool,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct UpdateWeddingRequest {
    #[serde(default)]
    #[validate(custom(function = "crate::validation::rules::validate_slug"))]
    pub slug: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 120))]
    pub title: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 60))]
    pub partner_one: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 60))]
    pub partner_two: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "crate::validation::rules::validate_url"))]
    pub website_url: Option<String>,
    #[serde(default)]
    #[validate(
        length(max = 5000),
        custom(function = "crate::validation::rules::validate_safe_html")
    )]
    pub description: Option<String>,
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub published: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WeddingListResponse {
    pub weddings: Vec<Wedding>,
    pub total: usize,
}

// =============================================================================
// RSVPs
// =============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Rsvp {
    pub id: String,
    pub wedding_id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub attending: bool,
    pub guests: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct CreateRsvpRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(default)]
    #[validate(email, length(max = 254))]
    pub email: String,
    #[serde(default)]
    #[validate(custom(function = "crate::validation::rules::validate_phone"))]
    pub phone: Option<String>,
    pub attending: bool,
    /// Additional guests, 0-10
    #[serde(default)]
    #[validate(range(max = 10))]
    pub guests: u8,
    #[serde(default)]
    #[validate(
        length(max = 1000),
        custom(function = "crate::validation::rules::validate_safe_html")
    )]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RsvpListResponse {
    pub rsvps: Vec<Rsvp>,
    pub total: usize,
    /// Responses with `attending = true`
    pub attending: usize,
    /// Attending responses plus their additional guests
    pub headcount: usize,
}

// =============================================================================
// Analytics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEvent {
    PageView,
    RsvpOpen,
    RsvpSubmit,
    Share,
}

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct AnalyticsEventRequest {
    #[serde(default)]
    #[validate(custom(function = "crate::validation::rules::validate_object_id"))]
    pub wedding_id: String,
    pub event: AnalyticsEvent,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventAccepted {
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn failures<T: Validate + serde::de::DeserializeOwned>(value: Value) -> Vec<(String, String)> {
        let request: T = serde_json::from_value(value).unwrap();
        match request.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => crate::validation::field_errors(&errors)
                .into_iter()
                .map(|e| (e.field, e.tag))
                .collect(),
        }
    }

    #[test]
    fn wedding_constraints_flag_slug_and_markup() {
        let errors = failures::<CreateWeddingRequest>(json!({
            "slug": "--bad",
            "title": "Ana & Ben",
            "partner_one": "Ana",
            "partner_two": "Ben",
            "description": "<script>alert(1)</script>"
        }));
        assert_eq!(
            errors,
            vec![
                ("description".to_string(), "safe_html".to_string()),
                ("slug".to_string(), "slug".to_string()),
            ]
        );
    }

    #[test]
    fn missing_required_strings_are_length_failures() {
        let errors = failures::<CreateWeddingRequest>(json!({ "slug": "ana-and-ben" }));
        let fields: Vec<&str> = errors.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fields, vec!["partner_one", "partner_two", "title"]);
        assert!(errors.iter().all(|(_, tag)| tag == "length"));
    }

    #[test]
    fn unknown_theme_does_not_bind() {
        let parsed = serde_json::from_value::<CreateWeddingRequest>(json!({
            "slug": "ana-and-ben",
            "title": "Ana & Ben",
            "partner_one": "Ana",
            "partner_two": "Ben",
            "theme": "neon"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn rsvp_constraints_check_guests_and_phone() {
        let errors = failures::<CreateRsvpRequest>(json!({
            "name": "Guest",
            "email": "guest@example.com",
            "phone": "12",
            "attending": true,
            "guests": 11
        }));
        assert_eq!(
            errors,
            vec![
                ("guests".to_string(), "range".to_string()),
                ("phone".to_string(), "phone".to_string()),
            ]
        );
    }

    #[test]
    fn analytics_event_names_bind() {
        let body = json!({
            "wedding_id": "507f1f77bcf86cd799439011",
            "event": "rsvp_submit"
        });
        assert!(failures::<AnalyticsEventRequest>(body.clone()).is_empty());
        let parsed: AnalyticsEventRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.event, AnalyticsEvent::RsvpSubmit);

        let errors = failures::<AnalyticsEventRequest>(json!({
            "wedding_id": "nope",
            "event": "share"
        }));
        assert_eq!(errors, vec![("wedding_id".to_string(), "object_id".to_string())]);
    }

    #[test]
    fn login_rejects_bad_email() {
        let errors = failures::<LoginRequest>(json!({ "email": "not-an-email", "password": "x" }));
        assert_eq!(errors, vec![("email".to_string(), "email".to_string())]);
    }

    #[test]
    fn profile_hides_password_hash() {
        let user = User {
            id: "507f1f77bcf86cd799439011".into(),
            first_name: "Ana".into(),
            last_name: "Silva".into(),
            email: "ana@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::User,
            status: UserStatus::Active,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&UserProfile::from(&user)).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"status\":\"active\""));
    }
}
