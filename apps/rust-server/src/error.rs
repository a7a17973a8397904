// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stable error codes and the uniform error envelope.
//!
//! Every failure that leaves the service is rendered as
//!
//! ```json
//! { "success": false, "error": { "code": "UPPER_SNAKE", "message": "...", "details": ... } }
//! ```
//!
//! The HTTP status is a pure function of the [`ErrorCode`]. Responses built
//! here also carry an [`ErrorReport`] extension so the funnel middleware can log
//! them with request context without re-parsing the body.

use std::time::Duration;

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// Stable, client-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input
    InvalidInput,
    ValidationError,
    ValidationFailed,
    InvalidEmail,
    InvalidSlug,
    WeakPassword,
    InvalidFileType,
    FileTooLarge,
    PayloadTooLarge,
    // Auth
    Unauthorized,
    InvalidToken,
    TokenRevoked,
    InvalidCredentials,
    AccountLocked,
    EmailNotVerified,
    // Access
    Forbidden,
    // Resource
    NotFound,
    MethodNotAllowed,
    Conflict,
    EmailAlreadyExists,
    // Throttling
    RateLimitExceeded,
    BruteForceProtection,
    // Server
    InternalError,
    UploadFailed,
    ServiceUnavailable,
}

impl ErrorCode {
    /// The wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::InvalidEmail => "INVALID_EMAIL",
            ErrorCode::InvalidSlug => "INVALID_SLUG",
            ErrorCode::WeakPassword => "WEAK_PASSWORD",
            ErrorCode::InvalidFileType => "INVALID_FILE_TYPE",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenRevoked => "TOKEN_REVOKED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::AccountLocked => "ACCOUNT_LOCKED",
            ErrorCode::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::BruteForceProtection => "BRUTE_FORCE_PROTECTION",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::UploadFailed => "UPLOAD_FAILED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// The HTTP status for this code. The mapping is fixed.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput
            | ErrorCode::ValidationError
            | ErrorCode::ValidationFailed
            | ErrorCode::InvalidEmail
            | ErrorCode::InvalidSlug
            | ErrorCode::WeakPassword
            | ErrorCode::InvalidFileType => StatusCode::BAD_REQUEST,
            ErrorCode::FileTooLarge | ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::Unauthorized
            | ErrorCode::InvalidToken
            | ErrorCode::TokenRevoked
            | ErrorCode::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ErrorCode::AccountLocked | ErrorCode::EmailNotVerified | ErrorCode::Forbidden => {
                StatusCode::FORBIDDEN
            }
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::Conflict | ErrorCode::EmailAlreadyExists => StatusCode::CONFLICT,
            ErrorCode::RateLimitExceeded | ErrorCode::BruteForceProtection => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ErrorCode::InternalError | ErrorCode::UploadFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Code used when a response with `status` reaches the funnel without one.
    pub fn for_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
            StatusCode::FORBIDDEN => ErrorCode::Forbidden,
            StatusCode::NOT_FOUND => ErrorCode::NotFound,
            StatusCode::METHOD_NOT_ALLOWED => ErrorCode::MethodNotAllowed,
            StatusCode::CONFLICT => ErrorCode::Conflict,
            StatusCode::PAYLOAD_TOO_LARGE => ErrorCode::PayloadTooLarge,
            StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimitExceeded,
            StatusCode::SERVICE_UNAVAILABLE => ErrorCode::ServiceUnavailable,
            s if s.is_server_error() => ErrorCode::InternalError,
            _ => ErrorCode::InvalidInput,
        }
    }

    /// Client-facing message used when no specific one is given.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "The requested resource was not found",
            ErrorCode::MethodNotAllowed => "Method not allowed for this resource",
            ErrorCode::PayloadTooLarge => "Request body is too large",
            ErrorCode::Unauthorized => "Authentication is required",
            ErrorCode::Forbidden => "You do not have permission to perform this action",
            ErrorCode::RateLimitExceeded => "Too many requests, please slow down",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::InternalError => "An internal error occurred",
            _ => "The request could not be processed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failing field reported by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    /// Constraint code, e.g. `length`, `email`, `slug`.
    pub tag: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            tag: tag.into(),
            message: message.into(),
        }
    }
}

/// Error type returned by handlers and middleware.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
    /// Server-side cause. Logged, never sent to clients by default.
    pub internal: Option<String>,
    pub retry_after: Option<Duration>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

/// Attached to every error response for the funnel to log.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    pub internal: Option<String>,
    pub stack: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            internal: None,
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_internal(mut self, cause: impl std::fmt::Display) -> Self {
        self.internal = Some(cause.to_string());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Internal failure. The client sees a generic message; `cause` is logged.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        Self::from_code(ErrorCode::InternalError).with_internal(cause)
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        let details = serde_json::to_value(&errors).unwrap_or(Value::Null);
        Self::new(ErrorCode::ValidationError, "Request validation failed").with_details(details)
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code,
            message: self.message.clone(),
            internal: self.internal.clone(),
            stack: None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report();
        let envelope = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        let mut response = (self.code.status(), Json(envelope)).into_response();
        if let Some(retry_after) = self.retry_after {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response.extensions_mut().insert(report);
        response
    }
}

/// Render an envelope for `code` with extra details, used by the funnel when
/// it rebuilds a response.
pub fn envelope_response(report: &ErrorReport, details: Option<Value>) -> Response {
    let envelope = ErrorEnvelope {
        success: false,
        error: ErrorBody {
            code: report.code,
            message: report.message.clone(),
            details,
        },
    };
    let mut response = (report.code.status(), Json(envelope)).into_response();
    response.extensions_mut().insert(report.clone());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn codes_map_to_fixed_statuses() {
        assert_eq!(ErrorCode::InvalidInput.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::RateLimitExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::InternalError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn code_serializes_as_upper_snake() {
        let value = serde_json::to_value(ErrorCode::BruteForceProtection).unwrap();
        assert_eq!(value, "BRUTE_FORCE_PROTECTION");
        assert_eq!(ErrorCode::EmailAlreadyExists.as_str(), "EMAIL_ALREADY_EXISTS");
        assert_eq!(
            serde_json::to_value(ErrorCode::ValidationError).unwrap(),
            ErrorCode::ValidationError.as_str()
        );
    }

    #[test]
    fn unknown_statuses_fall_back_by_class() {
        assert_eq!(
            ErrorCode::for_status(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            ErrorCode::InvalidInput
        );
        assert_eq!(
            ErrorCode::for_status(StatusCode::BAD_GATEWAY),
            ErrorCode::InternalError
        );
    }

    #[tokio::test]
    async fn into_response_returns_envelope() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.extensions().get::<ErrorReport>().is_some());

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
        assert_eq!(body["error"]["message"], "bad data");
        assert!(body["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn internal_errors_hide_their_cause() {
        let response = ApiError::internal("disk on fire").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = response.extensions().get::<ErrorReport>().cloned().unwrap();
        assert_eq!(report.internal.as_deref(), Some("disk on fire"));

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert!(!body.contains("disk on fire"));
    }

    #[test]
    fn retry_after_sets_header() {
        let response = ApiError::from_code(ErrorCode::RateLimitExceeded)
            .with_retry_after(Duration::from_secs(12))
            .into_response();
        assert_eq!(response.headers()[RETRY_AFTER], "12");
    }

    #[tokio::test]
    async fn validation_lists_each_field() {
        let response = ApiError::validation(vec![
            FieldError::new("slug", "slug", "bad slug"),
            FieldError::new("title", "length", "title is required"),
        ])
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"][0]["field"], "slug");
        assert_eq!(body["error"]["details"][1]["tag"], "length");
    }
}
