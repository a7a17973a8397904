// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wedding Invitations - API Server
//!
//! Couple accounts, wedding pages and guest RSVPs behind a request-security
//! pipeline: signed credentials with revocation, per-route rate limiting,
//! login abuse protection, input validation and sanitization, security
//! headers, CORS and a uniform error envelope.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers and the router (Axum)
//! - `auth` - Credentials, denylist, auth and role gates
//! - `security` - Edge middleware (headers, CORS, sanitizer, limiter, abuse guard)
//! - `validation` - Schema validation and validated extractors
//! - `funnel` - Error envelope and panic recovery
//! - `store` - In-memory accounts, weddings and RSVPs

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod funnel;
pub mod models;
pub mod security;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod validation;
