// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Service
//!
//! Issues and verifies compact signed credentials.
//!
//! ## Verification Order
//!
//! 1. Three base64url segments with a readable header
//! 2. Header `alg` equals the configured asymmetric algorithm (`none`, `HS*`
//!    and every other algorithm are refused before any signature work)
//! 3. Signature under the configured public key
//! 4. `iss`, then `aud`, then `exp`, then `nbf`
//!
//! The first failing step is reported. Expiry is compared in milliseconds so a
//! credential is invalid exactly at `exp` and valid one millisecond before.

use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, Header, Validation};
use serde::Deserialize;
use uuid::Uuid;

use super::claims::{Claims, RegisteredClaims};
use super::error::TokenError;
use super::keys::KeyPair;
use super::roles::Role;
use crate::config::AuthConfig;

/// Lifetime of an email verification credential.
pub const VERIFICATION_TTL: Duration = Duration::from_secs(24 * 3600);

/// Access and refresh credentials minted together.
#[derive(Debug, Clone)]
pub struct IssuedPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_id: String,
    pub refresh_id: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Signs and verifies credentials with a single immutable keypair.
#[derive(Debug)]
pub struct CredentialService {
    keys: KeyPair,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl CredentialService {
    pub fn new(keys: KeyPair, config: &AuthConfig) -> Self {
        Self {
            keys,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.keys.algorithm()
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Mint an access/refresh pair for `subject`.
    pub fn issue_pair(
        &self,
        subject: &str,
        device: Option<&str>,
        role: Role,
    ) -> Result<IssuedPair, TokenError> {
        self.issue_pair_at(subject, device, role, Utc::now())
    }

    pub fn issue_pair_at(
        &self,
        subject: &str,
        device: Option<&str>,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<IssuedPair, TokenError> {
        let access_registered = self.registered(subject, now, self.access_ttl);
        let refresh_registered = self.registered(subject, now, self.refresh_ttl);
        let access_id = access_registered.jti.clone();
        let refresh_id = refresh_registered.jti.clone();
        let access_expires_at = expiry_of(&access_registered);
        let refresh_expires_at = expiry_of(&refresh_registered);

        let access_token = self.sign(&Claims::Access {
            registered: access_registered,
            role,
            device_id: device.map(str::to_string),
        })?;
        let refresh_token = self.sign(&Claims::Refresh {
            registered: refresh_registered,
            device_id: device.map(str::to_string),
        })?;

        Ok(IssuedPair {
            access_token,
            refresh_token,
            access_id,
            refresh_id,
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Mint a 24-hour email verification credential.
    pub fn issue_verification(&self, subject: &str) -> Result<String, TokenError> {
        self.issue_verification_at(subject, Utc::now())
    }

    pub fn issue_verification_at(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        self.sign(&Claims::Verification {
            registered: self.registered(subject, now, VERIFICATION_TTL),
        })
    }

    /// Verify `token` against the wall clock.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` as of `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let header_alg = header_algorithm(token)?;
        let configured = self.keys.algorithm();
        match header_alg.parse::<Algorithm>() {
            Ok(alg) if alg == configured => {}
            _ => return Err(TokenError::WrongAlgorithm),
        }

        // Time and audience checks run below, in a fixed order.
        let mut validation = Validation::new(configured);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Claims>(token, self.keys.decoding_key(), &validation)
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::WrongAlgorithm
                }
                _ => TokenError::Malformed,
            })?;
        let claims = data.claims;
        let registered = claims.registered();

        if registered.iss != self.issuer {
            return Err(TokenError::WrongIssuer);
        }
        if registered.aud != self.audience {
            return Err(TokenError::WrongAudience);
        }
        let now_ms = now.timestamp_millis();
        if now_ms >= registered.exp.saturating_mul(1000) {
            return Err(TokenError::Expired);
        }
        if now_ms < registered.nbf.saturating_mul(1000) {
            return Err(TokenError::NotYetValid);
        }

        Ok(claims)
    }

    fn registered(&self, subject: &str, now: DateTime<Utc>, ttl: Duration) -> RegisteredClaims {
        let iat = now.timestamp();
        RegisteredClaims {
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat,
            nbf: iat,
            exp: iat + ttl.as_secs() as i64,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header::new(self.keys.algorithm());
        jsonwebtoken::encode(&header, claims, self.keys.encoding_key())
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

/// Time left before `claims` expire, at least one second.
///
/// Used as the TTL of denylist entries so they never outlive the credential.
pub fn remaining_lifetime(claims: &Claims, now: DateTime<Utc>) -> Duration {
    let remaining_ms = claims
        .expires_at()
        .saturating_mul(1000)
        .saturating_sub(now.timestamp_millis());
    Duration::from_millis(remaining_ms.max(1000) as u64)
}

fn expiry_of(registered: &RegisteredClaims) -> DateTime<Utc> {
    DateTime::from_timestamp(registered.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn header_algorithm(token: &str) -> Result<String, TokenError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };
    let bytes = Base64UrlUnpadded::decode_vec(header).map_err(|_| TokenError::Malformed)?;
    let raw: RawHeader = serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;
    Ok(raw.alg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::CredentialKind;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use chrono::TimeZone;
    use jsonwebtoken::EncodingKey;

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000, 0).unwrap()
    }

    fn service_with(config: &AuthConfig) -> (CredentialService, String) {
        let (keys, pems) = KeyPair::generate_ed25519().unwrap();
        (CredentialService::new(keys, config), pems.public_pem)
    }

    fn service() -> CredentialService {
        service_with(&AuthConfig::default()).0
    }

    fn craft_raw(header: &serde_json::Value, payload: &serde_json::Value, sig: &str) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string()),
            sig
        )
    }

    #[test]
    fn issued_pair_verifies_with_matching_claims() {
        let svc = service();
        let now = fixed_now();
        let pair = svc
            .issue_pair_at("user_1", Some("phone"), Role::User, now)
            .unwrap();
        assert_ne!(pair.access_id, pair.refresh_id);
        assert!(pair.refresh_expires_at >= pair.access_expires_at);

        let access = svc.verify_at(&pair.access_token, now).unwrap();
        match &access {
            Claims::Access {
                registered,
                role,
                device_id,
            } => {
                assert_eq!(registered.sub, "user_1");
                assert_eq!(registered.jti, pair.access_id);
                assert_eq!(registered.iss, "wedding-api");
                assert_eq!(registered.aud, "wedding-app");
                assert_eq!(registered.exp - registered.iat, 900);
                assert_eq!(*role, Role::User);
                assert_eq!(device_id.as_deref(), Some("phone"));
            }
            other => panic!("expected access claims, got {other:?}"),
        }

        let refresh = svc.verify_at(&pair.refresh_token, now).unwrap();
        assert_eq!(refresh.kind(), CredentialKind::Refresh);
        assert_eq!(refresh.id(), pair.refresh_id);
        assert_eq!(refresh.device_id(), Some("phone"));
    }

    #[test]
    fn ids_are_unique_across_pairs() {
        let svc = service();
        let a = svc.issue_pair("u", None, Role::User).unwrap();
        let b = svc.issue_pair("u", None, Role::User).unwrap();
        assert_ne!(a.access_id, b.access_id);
        assert_ne!(a.refresh_id, b.refresh_id);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let svc = service();
        let now = fixed_now();
        let pair = svc.issue_pair_at("u", None, Role::User, now).unwrap();
        let exp = now + chrono::Duration::seconds(900);

        let just_before = exp - chrono::Duration::milliseconds(1);
        assert!(svc.verify_at(&pair.access_token, just_before).is_ok());
        assert_eq!(
            svc.verify_at(&pair.access_token, exp),
            Err(TokenError::Expired)
        );
        assert_eq!(
            svc.verify_at(&pair.access_token, exp + chrono::Duration::days(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn not_yet_valid_before_nbf() {
        let svc = service();
        let now = fixed_now();
        let pair = svc.issue_pair_at("u", None, Role::User, now).unwrap();
        assert_eq!(
            svc.verify_at(&pair.access_token, now - chrono::Duration::milliseconds(1)),
            Err(TokenError::NotYetValid)
        );
    }

    #[test]
    fn verification_credential_lasts_one_day() {
        let svc = service();
        let now = fixed_now();
        let token = svc.issue_verification_at("u", now).unwrap();
        let claims = svc.verify_at(&token, now).unwrap();
        assert_eq!(claims.kind(), CredentialKind::Verification);
        assert_eq!(claims.expires_at() - now.timestamp(), 24 * 3600);
        assert_eq!(
            svc.verify_at(&token, now + chrono::Duration::hours(24)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn rejects_alg_none() {
        let svc = service();
        let token = craft_raw(
            &serde_json::json!({"alg": "none", "typ": "JWT"}),
            &serde_json::json!({
                "sub": "u", "jti": "j", "iss": "wedding-api", "aud": "wedding-app",
                "iat": 1, "nbf": 1, "exp": 4_000_000_000i64, "role": "admin"
            }),
            "",
        );
        assert_eq!(svc.verify(&token), Err(TokenError::WrongAlgorithm));
    }

    #[test]
    fn rejects_hs256_forged_with_public_key_bytes() {
        let (svc, public_pem) = service_with(&AuthConfig::default());
        let pair = svc.issue_pair("u", None, Role::User).unwrap();
        let claims = svc.verify(&pair.access_token).unwrap();

        let forged = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(public_pem.as_bytes()),
        )
        .unwrap();
        assert_eq!(svc.verify(&forged), Err(TokenError::WrongAlgorithm));
    }

    #[test]
    fn rejects_foreign_signature() {
        let svc = service();
        let other = service();
        let pair = other.issue_pair("u", None, Role::Admin).unwrap();
        assert_eq!(svc.verify(&pair.access_token), Err(TokenError::BadSignature));
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let svc = service();
        let pair = svc.issue_pair("u", None, Role::User).unwrap();
        let mut parts: Vec<&str> = pair.access_token.split('.').collect();
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "sub": "u", "jti": "j", "iss": "wedding-api", "aud": "wedding-app",
                "iat": 1, "nbf": 1, "exp": 4_000_000_000i64, "role": "admin"
            })
            .to_string(),
        );
        parts[1] = &payload;
        assert_eq!(svc.verify(&parts.join(".")), Err(TokenError::BadSignature));
    }

    #[test]
    fn issuer_then_audience_are_checked() {
        let (keys, pems) = KeyPair::generate_ed25519().unwrap();
        let verifier = CredentialService::new(keys, &AuthConfig::default());

        let foreign_issuer = CredentialService::new(
            KeyPair::from_pem("EdDSA", &pems.private_pem, None).unwrap(),
            &AuthConfig {
                issuer: "someone-else".to_string(),
                audience: "other-app".to_string(),
                ..AuthConfig::default()
            },
        );
        let token = foreign_issuer.issue_pair("u", None, Role::User).unwrap();
        assert_eq!(
            verifier.verify(&token.access_token),
            Err(TokenError::WrongIssuer)
        );

        let foreign_audience = CredentialService::new(
            KeyPair::from_pem("EdDSA", &pems.private_pem, None).unwrap(),
            &AuthConfig {
                audience: "other-app".to_string(),
                ..AuthConfig::default()
            },
        );
        let token = foreign_audience.issue_pair("u", None, Role::User).unwrap();
        assert_eq!(
            verifier.verify(&token.access_token),
            Err(TokenError::WrongAudience)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let svc = service();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.e30.sig"] {
            assert_eq!(svc.verify(token), Err(TokenError::Malformed), "{token}");
        }
    }

    #[test]
    fn remaining_lifetime_tracks_expiry() {
        let svc = service();
        let now = fixed_now();
        let pair = svc.issue_pair_at("u", None, Role::User, now).unwrap();
        let claims = svc.verify_at(&pair.access_token, now).unwrap();
        assert_eq!(remaining_lifetime(&claims, now), Duration::from_secs(900));
        assert_eq!(
            remaining_lifetime(&claims, now + chrono::Duration::hours(1)),
            Duration::from_secs(1)
        );
    }
}
