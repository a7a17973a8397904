// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::error::{ApiError, ErrorCode};

/// Why a presented credential failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Not three base64url segments, bad JSON, or unexpected claim shape
    #[error("Token is malformed")]
    Malformed,
    /// Signature does not verify under the configured key
    #[error("Token signature is invalid")]
    BadSignature,
    /// `now >= exp`
    #[error("Token has expired")]
    Expired,
    /// `now < nbf`
    #[error("Token is not yet valid")]
    NotYetValid,
    #[error("Token issuer is invalid")]
    WrongIssuer,
    #[error("Token audience is invalid")]
    WrongAudience,
    /// Header algorithm differs from the configured one (including `none`)
    #[error("Token algorithm is not accepted")]
    WrongAlgorithm,
    /// Signing a new credential failed
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::BadSignature => "bad_signature",
            TokenError::Expired => "expired",
            TokenError::NotYetValid => "not_yet_valid",
            TokenError::WrongIssuer => "wrong_issuer",
            TokenError::WrongAudience => "wrong_audience",
            TokenError::WrongAlgorithm => "wrong_algorithm",
            TokenError::Signing(_) => "signing_failed",
        }
    }
}

/// Failure raised by the auth and role gates.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer header and no credential cookie
    #[error("Authentication is required")]
    MissingCredential,
    /// Credential failed verification
    #[error("{0}")]
    InvalidToken(#[from] TokenError),
    /// Credential is valid but is not an access credential
    #[error("Token cannot be used to access this resource")]
    WrongCredentialKind,
    /// Credential id is on the denylist
    #[error("Token has been revoked")]
    Revoked,
    /// Denylist could not be consulted; requests fail closed
    #[error("Authentication is required")]
    StoreUnavailable(String),
    /// No caller identity attached to the request
    #[error("Authentication is required")]
    Unauthenticated,
    /// Caller lacks the required role
    #[error("Insufficient permissions for this operation")]
    InsufficientPermissions,
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::MissingCredential
            | AuthError::StoreUnavailable(_)
            | AuthError::Unauthenticated => ErrorCode::Unauthorized,
            AuthError::InvalidToken(_) | AuthError::WrongCredentialKind => ErrorCode::InvalidToken,
            AuthError::Revoked => ErrorCode::TokenRevoked,
            AuthError::InsufficientPermissions => ErrorCode::Forbidden,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let api = ApiError::new(err.code(), err.to_string());
        match err {
            AuthError::StoreUnavailable(cause) => api.with_internal(cause),
            AuthError::InvalidToken(reason) => api.with_internal(reason.reason()),
            _ => api,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
