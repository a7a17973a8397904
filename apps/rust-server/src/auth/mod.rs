// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Credential lifecycle and the auth/role gates.
//!
//! ## Credential Flow
//!
//! 1. Login or registration mints an access/refresh pair signed with the
//!    service keypair ([`keys`], [`tokens`])
//! 2. Clients send `Authorization: Bearer <access>` or the `access_token`
//!    cookie
//! 3. The auth gate verifies the credential and consults the [`denylist`]
//! 4. Refresh rotates the pair; logout and password reset revoke
//!
//! ## Security
//!
//! - Only the configured asymmetric algorithm is accepted
//! - Access credentials live 15 minutes, refresh credentials 7 days by default
//! - A denylist outage fails closed

pub mod claims;
pub mod denylist;
pub mod error;
pub mod extractor;
pub mod keys;
pub mod middleware;
pub mod password;
pub mod roles;
pub mod tokens;

pub use claims::{CallerIdentity, Claims, CredentialKind};
pub use error::{AuthError, TokenError};
pub use extractor::{AdminOnly, Auth, OptionalAuth};
pub use roles::Role;
pub use tokens::CredentialService;
