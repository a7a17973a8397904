// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Validation
//!
//! Request types derive [`validator::Validate`]; semantic field classes are
//! the custom functions in [`rules`]. The [`ValidatedJson`] and
//! [`ValidatedQuery`] extractors then run:
//!
//! 1. Parse and bind the body or query. The first structural failure (bad
//!    JSON, not an object, wrong type, unknown enum value) stops here with
//!    `INVALID_INPUT`.
//! 2. Evaluate every constraint, collecting all failures into a single
//!    `VALIDATION_ERROR` whose `details` list `{field, tag, message}`.
//!
//! Required strings default to empty when absent so that a missing field is
//! reported by step 2 alongside every other constraint failure.
//!
//! Tags are the validator codes: `length`, `range`, `email`, `url`, `phone`,
//! `slug`, `object_id`, `safe_html`.

pub mod rules;

use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, OptionalFromRequest, Query, Request},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
    },
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{ApiError, ErrorCode, FieldError};

/// Flatten validator output into field errors, ordered by field then tag.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = Vec::new();
    for (field, failures) in errors.field_errors() {
        let field = field.to_string();
        for failure in failures.iter() {
            fields.push(FieldError::new(
                field.clone(),
                failure.code.to_string(),
                describe(&field, failure),
            ));
        }
    }
    fields.sort_by(|a, b| (&a.field, &a.tag).cmp(&(&b.field, &b.tag)));
    fields
}

fn describe(field: &str, failure: &ValidationError) -> String {
    if let Some(message) = &failure.message {
        return format!("{field} {message}");
    }
    let param = |name: &str| failure.params.get(name).map(Value::to_string);
    match failure.code.as_ref() {
        "length" => match (param("min"), param("max")) {
            (Some(min), Some(max)) if min == "1" => {
                format!("{field} is required and must be at most {max} characters")
            }
            (Some(min), Some(max)) => format!("{field} must be {min}-{max} characters"),
            (Some(min), None) => format!("{field} must be at least {min} characters"),
            (None, Some(max)) => format!("{field} must be at most {max} characters"),
            (None, None) => format!("{field} has an invalid length"),
        },
        "range" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("{field} must be between {min} and {max}"),
            (None, Some(max)) => format!("{field} must be at most {max}"),
            (Some(min), None) => format!("{field} must be at least {min}"),
            (None, None) => format!("{field} is out of range"),
        },
        "email" => format!("{field} must be a valid email address"),
        _ => format!("{field} is invalid"),
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::validation(field_errors(&errors))
    }
}

/// JSON body that bound and passed its constraints.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("application/json"));
        if !is_json {
            return Err(ApiError::bad_request(
                "Expected a request body with content type application/json",
            ));
        }

        let bytes = <Bytes as FromRequest<S>>::from_request(req, state).await.map_err(|rejection| {
            ApiError::from_code(ErrorCode::for_status(rejection.status())).with_internal(rejection)
        })?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::bad_request("Request body is not valid JSON").with_internal(e))?;
        if !value.is_object() {
            return Err(ApiError::bad_request("Request body must be a JSON object"));
        }
        let request: T = serde_json::from_value(value)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?;

        request.validate()?;
        Ok(ValidatedJson(request))
    }
}

/// `None` when the request carries no body at all; otherwise validated like
/// a required body.
impl<T, S> OptionalFromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let declares_body = req.headers().contains_key(CONTENT_TYPE)
            || req
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|len| len != "0");
        if !declares_body {
            return Ok(None);
        }
        <Self as FromRequest<S>>::from_request(req, state).await.map(Some)
    }
}

/// Query string that bound and passed its constraints.
#[derive(Debug, Clone)]
pub struct ValidatedQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<T>::try_from_uri(&parts.uri)
            .map_err(|e| ApiError::bad_request(format!("Invalid query string: {e}")))?;
        query.validate()?;
        Ok(ValidatedQuery(query))
    }
}
