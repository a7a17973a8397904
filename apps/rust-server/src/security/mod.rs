// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Security Pipeline
//!
//! Edge middleware shared by every route. Layer order (outermost first):
//!
//! 1. [`headers::security_headers`]
//! 2. [`crate::funnel`] (error envelope, panic recovery)
//! 3. [`cors::cors`]
//! 4. [`sanitize::sanitize`]
//! 5. [`rate_limit::rate_limit`]
//! 6. [`brute_force::abuse_guard`]
//! 7. auth and role gates ([`crate::auth::middleware`]), per route group

pub mod brute_force;
pub mod client;
pub mod cors;
pub mod headers;
pub mod rate_limit;
pub mod sanitize;

pub use brute_force::AbuseGuard;
pub use client::client_ip;
pub use cors::CorsPolicy;
pub use headers::SecurityHeaders;
pub use rate_limit::{RateLimiter, RouteClass};
