// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Control-character stripping for mutating requests.
//!
//! On `POST`, `PUT` and `PATCH` the query string, form fields and JSON string
//! values lose every control character except newline and tab. Inputs without
//! control characters pass through byte-for-byte.

use std::borrow::Cow;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::Request,
    http::{header, uri::PathAndQuery, HeaderValue, Method, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::error::{ApiError, ErrorCode};

/// Matches axum's default request body limit.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn is_stripped(c: char) -> bool {
    c.is_control() && c != '\n' && c != '\t'
}

/// Remove control characters other than `\n` and `\t`.
pub fn strip_control(input: &str) -> Cow<'_, str> {
    if input.chars().any(is_stripped) {
        Cow::Owned(input.chars().filter(|c| !is_stripped(*c)).collect())
    } else {
        Cow::Borrowed(input)
    }
}

/// Clean every string in a JSON value, keys included. Returns whether
/// anything changed.
pub fn sanitize_json(value: &mut Value) -> bool {
    match value {
        Value::String(s) => match strip_control(s) {
            Cow::Owned(clean) => {
                *s = clean;
                true
            }
            Cow::Borrowed(_) => false,
        },
        Value::Array(items) => items.iter_mut().fold(false, |changed, v| sanitize_json(v) | changed),
        Value::Object(map) => {
            let needs_key_fix = map.keys().any(|k| k.chars().any(is_stripped));
            let mut changed = false;
            if needs_key_fix {
                let entries = std::mem::take(map);
                for (k, v) in entries {
                    map.insert(strip_control(&k).into_owned(), v);
                }
                changed = true;
            }
            map.values_mut().fold(changed, |changed, v| sanitize_json(v) | changed)
        }
        _ => false,
    }
}

/// Clean an urlencoded string. `None` when nothing needed cleaning.
pub fn sanitize_urlencoded(input: &[u8]) -> Option<String> {
    let pairs: Vec<(Cow<'_, str>, Cow<'_, str>)> = url::form_urlencoded::parse(input).collect();
    let dirty = pairs
        .iter()
        .any(|(k, v)| k.chars().any(is_stripped) || v.chars().any(is_stripped));
    if !dirty {
        return None;
    }
    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        out.append_pair(&strip_control(k), &strip_control(v));
    }
    Some(out.finish())
}

fn sanitize_uri(uri: &Uri) -> Option<Uri> {
    let clean = sanitize_urlencoded(uri.query()?.as_bytes())?;
    let path_and_query = PathAndQuery::try_from(format!("{}?{clean}", uri.path())).ok()?;
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).ok()
}

fn sanitize_body(content_type: &str, body: &Bytes) -> Option<Bytes> {
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return sanitize_urlencoded(body).map(Bytes::from);
    }
    if content_type.starts_with("application/json") {
        let mut value: Value = serde_json::from_slice(body).ok()?;
        if sanitize_json(&mut value) {
            return serde_json::to_vec(&value).ok().map(Bytes::from);
        }
    }
    None
}

/// Middleware: sanitize query and body of mutating requests.
pub async fn sanitize(request: Request, next: Next) -> Response {
    if !matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    if let Some(uri) = sanitize_uri(&parts.uri) {
        parts.uri = uri;
    }

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::from_code(ErrorCode::PayloadTooLarge).into_response(),
    };
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let bytes = match sanitize_body(&content_type, &bytes) {
        Some(clean) => {
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(clean.len()));
            clean
        }
        None => bytes,
    };

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_controls_but_keeps_newline_and_tab() {
        assert_eq!(strip_control("a\0b\x07c\r\nd\te\x1b"), "abc\nd\te");
        assert!(matches!(strip_control("clean text"), Cow::Borrowed(_)));
    }

    #[test]
    fn output_has_no_low_control_bytes() {
        let input: String = (0u8..=0x7f).map(char::from).collect();
        let clean = strip_control(&input);
        assert!(clean
            .bytes()
            .all(|b| b >= 0x20 || b == b'\t' || b == b'\n'));
        assert!(clean.contains('\t') && clean.contains('\n'));
    }

    #[test]
    fn cleans_nested_json_strings() {
        let mut value = json!({
            "title": "Ana\0 & Ben",
            "tags": ["a\x01", "b"],
            "nested": { "note\x02": "x\x7f" },
            "guests": 2
        });
        assert!(sanitize_json(&mut value));
        assert_eq!(
            value,
            json!({
                "title": "Ana & Ben",
                "tags": ["a", "b"],
                "nested": { "note": "x" },
                "guests": 2
            })
        );
    }

    #[test]
    fn clean_json_is_untouched() {
        let mut value = json!({"title": "fine"});
        assert!(!sanitize_json(&mut value));
    }

    #[test]
    fn cleans_query_and_form() {
        let uri: Uri = "/weddings?q=a%00b&page=1".parse().unwrap();
        let clean = sanitize_uri(&uri).unwrap();
        assert_eq!(clean.path(), "/weddings");
        assert_eq!(clean.query(), Some("q=ab&page=1"));

        assert!(sanitize_uri(&"/weddings?q=ok".parse().unwrap()).is_none());
        assert_eq!(
            sanitize_urlencoded(b"email=a%40b.co&name=x%1Fy").as_deref(),
            Some("email=a%40b.co&name=xy")
        );
    }
}
