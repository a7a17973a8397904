// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Error Funnel
//!
//! Final responder for failures.
//!
//! - Responses built from [`ApiError`](crate::error::ApiError) carry an
//!   [`ErrorReport`]; the funnel logs them with request context.
//! - Error statuses produced elsewhere (unknown route, wrong method, extractor
//!   rejections) are rewritten into the envelope using
//!   [`ErrorCode::for_status`].
//! - Panics are caught by `CatchPanicLayer` with [`panic_response`] and arrive
//!   here as `INTERNAL_ERROR` with the panic message and, when the hook from
//!   [`install_panic_hook`] is active, the stack.
//!
//! In development the internal cause and stack of 5xx responses are added to
//! `details`; in production they are only logged.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::net::IpAddr;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use tower_http::request_id::RequestId;
use tracing::{error, warn};

use crate::error::{envelope_response, ErrorCode, ErrorReport};
use crate::security::client::{client_ip, user_agent};
use crate::state::AppState;

thread_local! {
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Record the stack of every panic for [`panic_response`]. Chains to the
/// previously installed hook.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let stack = Backtrace::force_capture().to_string();
        PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
        previous(info);
    }));
}

/// Marks a response produced by the panic handler.
#[derive(Debug, Clone, Copy)]
pub struct Panicked;

/// `CatchPanicLayer` handler: `INTERNAL_ERROR` with the panic recorded in the
/// report.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    let stack = PANIC_STACK.with(|slot| slot.borrow_mut().take());

    let report = ErrorReport {
        code: ErrorCode::InternalError,
        message: "An internal error occurred".to_string(),
        internal: Some(format!("panic: {message}")),
        stack,
    };
    let mut response = envelope_response(&report, None);
    response.extensions_mut().insert(Panicked);
    response
}

struct RequestContext {
    method: String,
    path: String,
    client_ip: String,
    user_agent: Option<String>,
    request_id: Option<String>,
}

impl RequestContext {
    fn capture(request: &Request, trusted_proxies: &[IpAddr]) -> Self {
        Self {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            client_ip: client_ip(request.headers(), request.extensions(), trusted_proxies),
            user_agent: user_agent(request.headers()).map(str::to_string),
            request_id: request
                .extensions()
                .get::<RequestId>()
                .and_then(|id| id.header_value().to_str().ok())
                .map(str::to_string),
        }
    }
}

/// Middleware: log and normalize every error response.
pub async fn error_funnel(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ctx = RequestContext::capture(&request, &state.config.trusted_proxies);
    let response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let settings = &state.config.error_handling;
    let panicked = response.extensions().get::<Panicked>().is_some();
    let (report, mut response) = match response.extensions().get::<ErrorReport>().cloned() {
        Some(report) => (report, response),
        None => {
            let code = ErrorCode::for_status(status);
            let report = ErrorReport {
                code,
                message: code.default_message().to_string(),
                internal: None,
                stack: None,
            };
            let rebuilt = rebuild(&report, None, response.headers());
            (report, rebuilt)
        }
    };

    let internal = if settings.log_detailed_errors {
        report.internal.as_deref()
    } else {
        None
    };
    if panicked {
        error!(
            method = %ctx.method,
            path = %ctx.path,
            client_ip = %ctx.client_ip,
            user_agent = ctx.user_agent.as_deref(),
            request_id = ctx.request_id.as_deref(),
            cause = report.internal.as_deref(),
            stack = report.stack.as_deref(),
            "Recovered from panic"
        );
    } else if status.is_server_error() {
        error!(
            method = %ctx.method,
            path = %ctx.path,
            client_ip = %ctx.client_ip,
            user_agent = ctx.user_agent.as_deref(),
            request_id = ctx.request_id.as_deref(),
            code = report.code.as_str(),
            status = status.as_u16(),
            internal,
            "Request failed"
        );
    } else {
        warn!(
            method = %ctx.method,
            path = %ctx.path,
            client_ip = %ctx.client_ip,
            request_id = ctx.request_id.as_deref(),
            code = report.code.as_str(),
            status = status.as_u16(),
            internal,
            "Request rejected"
        );
    }

    if status.is_server_error() && settings.include_stack_trace {
        let details = json!({
            "internal": report.internal,
            "stack": report.stack,
        });
        response = rebuild(&report, Some(details), response.headers());
    }
    response
}

/// Fresh envelope for `report`, keeping headers that describe the failure.
fn rebuild(report: &ErrorReport, details: Option<serde_json::Value>, original: &HeaderMap) -> Response {
    let mut response = envelope_response(report, details);
    for name in [header::ALLOW, header::RETRY_AFTER, header::WWW_AUTHENTICATE] {
        if let Some(value) = original.get(&name) {
            response.headers_mut().insert(name, value.clone());
        }
    }
    response
}
