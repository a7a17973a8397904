// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential claims and the caller identity derived from them.
//!
//! On the wire every credential is a flat JSON object:
//!
//! ```json
//! { "sub": "...", "jti": "...", "iss": "...", "aud": "...",
//!   "iat": 0, "nbf": 0, "exp": 0, "device_id": "...", "role": "user" }
//! ```
//!
//! Access credentials carry `role`; refresh and verification credentials carry
//! `kind`. In code the claims are the tagged [`Claims`] enum.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::roles::Role;

const KIND_ACCESS: &str = "access";
const KIND_REFRESH: &str = "refresh";
const KIND_VERIFICATION: &str = "verification";

/// What a credential may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Access,
    Refresh,
    Verification,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Access => KIND_ACCESS,
            CredentialKind::Refresh => KIND_REFRESH,
            CredentialKind::Verification => KIND_VERIFICATION,
        }
    }
}

/// Claims shared by every credential kind. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClaims {
    pub sub: String,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Verified credential contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireClaims", into = "WireClaims")]
pub enum Claims {
    Access {
        registered: RegisteredClaims,
        role: Role,
        device_id: Option<String>,
    },
    Refresh {
        registered: RegisteredClaims,
        device_id: Option<String>,
    },
    Verification {
        registered: RegisteredClaims,
    },
}

impl Claims {
    pub fn registered(&self) -> &RegisteredClaims {
        match self {
            Claims::Access { registered, .. }
            | Claims::Refresh { registered, .. }
            | Claims::Verification { registered } => registered,
        }
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Claims::Access { .. } => CredentialKind::Access,
            Claims::Refresh { .. } => CredentialKind::Refresh,
            Claims::Verification { .. } => CredentialKind::Verification,
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            Claims::Access { device_id, .. } | Claims::Refresh { device_id, .. } => {
                device_id.as_deref()
            }
            Claims::Verification { .. } => None,
        }
    }

    pub fn subject(&self) -> &str {
        &self.registered().sub
    }

    pub fn id(&self) -> &str {
        &self.registered().jti
    }

    pub fn expires_at(&self) -> i64 {
        self.registered().exp
    }
}

/// Flat serialized form of [`Claims`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireClaims {
    sub: String,
    jti: String,
    iss: String,
    aud: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

impl TryFrom<WireClaims> for Claims {
    type Error = String;

    fn try_from(wire: WireClaims) -> Result<Self, Self::Error> {
        if wire.exp <= wire.iat {
            return Err("exp must be after iat".to_string());
        }
        if wire.sub.is_empty() || wire.jti.is_empty() {
            return Err("sub and jti must be present".to_string());
        }
        let registered = RegisteredClaims {
            sub: wire.sub,
            jti: wire.jti,
            iss: wire.iss,
            aud: wire.aud,
            iat: wire.iat,
            nbf: wire.nbf,
            exp: wire.exp,
        };
        match (wire.kind.as_deref(), wire.role) {
            (None | Some(KIND_ACCESS), Some(role)) => Ok(Claims::Access {
                registered,
                role,
                device_id: wire.device_id,
            }),
            (Some(KIND_REFRESH), None) => Ok(Claims::Refresh {
                registered,
                device_id: wire.device_id,
            }),
            (Some(KIND_VERIFICATION), None) => Ok(Claims::Verification { registered }),
            (kind, role) => Err(format!(
                "unrecognised credential shape (kind={kind:?}, role={role:?})"
            )),
        }
    }
}

impl From<Claims> for WireClaims {
    fn from(claims: Claims) -> Self {
        let (registered, role, kind, device_id) = match claims {
            Claims::Access {
                registered,
                role,
                device_id,
            } => (registered, Some(role), None, device_id),
            Claims::Refresh {
                registered,
                device_id,
            } => (registered, None, Some(KIND_REFRESH.to_string()), device_id),
            Claims::Verification { registered } => {
                (registered, None, Some(KIND_VERIFICATION.to_string()), None)
            }
        };
        WireClaims {
            sub: registered.sub,
            jti: registered.jti,
            iss: registered.iss,
            aud: registered.aud,
            iat: registered.iat,
            nbf: registered.nbf,
            exp: registered.exp,
            device_id,
            role,
            kind,
        }
    }
}

/// Authenticated caller attached to the request by the auth gate.
///
/// This is the primary type used throughout the application to represent
/// who is making a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CallerIdentity {
    /// Subject (user id)
    pub user_id: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Credential id (`jti`) of the presented access credential
    pub credential_id: String,
    /// Expiry of the presented credential (Unix seconds)
    #[serde(skip)]
    pub expires_at: i64,
}

impl CallerIdentity {
    /// Build from access claims. Other credential kinds do not identify a caller.
    pub fn from_claims(claims: &Claims) -> Option<Self> {
        match claims {
            Claims::Access {
                registered,
                role,
                device_id,
            } => Some(Self {
                user_id: registered.sub.clone(),
                role: *role,
                device_id: device_id.clone(),
                credential_id: registered.jti.clone(),
                expires_at: registered.exp,
            }),
            _ => None,
        }
    }

    pub fn has_role(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registered() -> RegisteredClaims {
        RegisteredClaims {
            sub: "user_123".to_string(),
            jti: "jti_1".to_string(),
            iss: "wedding-api".to_string(),
            aud: "wedding-app".to_string(),
            iat: 1_700_000_000,
            nbf: 1_700_000_000,
            exp: 1_700_000_900,
        }
    }

    #[test]
    fn access_claims_serialize_role_without_kind() {
        let claims = Claims::Access {
            registered: registered(),
            role: Role::User,
            device_id: Some("phone".to_string()),
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["device_id"], "phone");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn every_kind_round_trips() {
        for claims in [
            Claims::Access {
                registered: registered(),
                role: Role::Admin,
                device_id: None,
            },
            Claims::Refresh {
                registered: registered(),
                device_id: Some("laptop".to_string()),
            },
            Claims::Verification {
                registered: registered(),
            },
        ] {
            let text = serde_json::to_string(&claims).unwrap();
            let parsed: Claims = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, claims);
        }
    }

    #[test]
    fn kind_dispatch_from_wire() {
        let refresh: Claims = serde_json::from_value(json!({
            "sub": "u", "jti": "j", "iss": "i", "aud": "a",
            "iat": 1, "nbf": 1, "exp": 2, "kind": "refresh"
        }))
        .unwrap();
        assert_eq!(refresh.kind(), CredentialKind::Refresh);
        assert!(CallerIdentity::from_claims(&refresh).is_none());
    }

    #[test]
    fn role_and_refresh_kind_together_is_rejected() {
        let result: Result<Claims, _> = serde_json::from_value(json!({
            "sub": "u", "jti": "j", "iss": "i", "aud": "a",
            "iat": 1, "nbf": 1, "exp": 2, "kind": "refresh", "role": "admin"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn expiry_must_follow_issue_time() {
        let result: Result<Claims, _> = serde_json::from_value(json!({
            "sub": "u", "jti": "j", "iss": "i", "aud": "a",
            "iat": 10, "nbf": 10, "exp": 10, "role": "user"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn caller_identity_from_access_claims() {
        let claims = Claims::Access {
            registered: registered(),
            role: Role::Admin,
            device_id: None,
        };
        let caller = CallerIdentity::from_claims(&claims).unwrap();
        assert_eq!(caller.user_id, "user_123");
        assert_eq!(caller.credential_id, "jti_1");
        assert!(caller.is_admin());
        assert!(caller.has_role(Role::User));
    }
}
