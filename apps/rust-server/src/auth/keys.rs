// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing key material.
//!
//! The keypair is parsed from PEM once at startup and is immutable
//! afterwards. Only asymmetric algorithms are accepted.
//!
//! | Algorithm | Private key | Public key |
//! |-----------|-------------|------------|
//! | `EdDSA` | PKCS#8 `PRIVATE KEY` | SPKI `PUBLIC KEY`, raw 32 bytes, or derived |
//! | `RS*` / `PS*` | PKCS#1 or PKCS#8 | SPKI or PKCS#1 `RSA PUBLIC KEY` |
//! | `ES256` / `ES384` | PKCS#8 or SEC1 | SPKI |

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair as _};
use thiserror::Error;

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (RFC 8410).
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];
const ED25519_PUBLIC_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("unknown signing algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("algorithm {0:?} is symmetric; an asymmetric algorithm is required")]
    SymmetricAlgorithm(Algorithm),
    #[error("invalid PEM: {0}")]
    InvalidPem(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("a public key is required for {0:?}")]
    MissingPublicKey(Algorithm),
    #[error("key generation failed")]
    Generation,
}

/// Asymmetric keypair used to sign and verify credentials.
pub struct KeyPair {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Freshly generated PEM pair, returned by [`KeyPair::generate_ed25519`].
#[derive(Debug, Clone)]
pub struct GeneratedKeys {
    pub private_pem: String,
    pub public_pem: String,
}

impl KeyPair {
    /// Parse a keypair for `algorithm` from PEM text.
    ///
    /// # Errors
    ///
    /// Fails on symmetric or unknown algorithms, unreadable PEM, or a missing
    /// public key for algorithms where it cannot be derived.
    pub fn from_pem(
        algorithm: &str,
        private_pem: &str,
        public_pem: Option<&str>,
    ) -> Result<Self, KeyError> {
        let algorithm = parse_algorithm(algorithm)?;
        match algorithm {
            Algorithm::EdDSA => Self::ed25519(private_pem, public_pem),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => {
                let public_pem = public_pem.ok_or(KeyError::MissingPublicKey(algorithm))?;
                Ok(Self {
                    algorithm,
                    encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes())
                        .map_err(|e| KeyError::InvalidKey(e.to_string()))?,
                    decoding: DecodingKey::from_rsa_pem(public_pem.as_bytes())
                        .map_err(|e| KeyError::InvalidKey(e.to_string()))?,
                })
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                let public_pem = public_pem.ok_or(KeyError::MissingPublicKey(algorithm))?;
                Ok(Self {
                    algorithm,
                    encoding: EncodingKey::from_ec_pem(private_pem.as_bytes())
                        .map_err(|e| KeyError::InvalidKey(e.to_string()))?,
                    decoding: DecodingKey::from_ec_pem(public_pem.as_bytes())
                        .map_err(|e| KeyError::InvalidKey(e.to_string()))?,
                })
            }
            other => Err(KeyError::SymmetricAlgorithm(other)),
        }
    }

    fn ed25519(private_pem: &str, public_pem: Option<&str>) -> Result<Self, KeyError> {
        let private = pem::parse(private_pem).map_err(|e| KeyError::InvalidPem(e.to_string()))?;
        if private.tag() != "PRIVATE KEY" {
            return Err(KeyError::InvalidPem(format!(
                "expected PRIVATE KEY, found {}",
                private.tag()
            )));
        }
        let signer = Ed25519KeyPair::from_pkcs8_maybe_unchecked(private.contents())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        let public_raw = match public_pem {
            Some(text) => ed25519_public_from_pem(text)?,
            None => signer.public_key().as_ref().to_vec(),
        };
        if public_raw != signer.public_key().as_ref() {
            return Err(KeyError::InvalidKey(
                "public key does not match private key".to_string(),
            ));
        }

        Ok(Self {
            algorithm: Algorithm::EdDSA,
            encoding: EncodingKey::from_ed_der(private.contents()),
            decoding: DecodingKey::from_ed_der(&public_raw),
        })
    }

    /// Generate a fresh Ed25519 keypair. Used for tests and ephemeral
    /// development servers.
    pub fn generate_ed25519() -> Result<(Self, GeneratedKeys), KeyError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeyError::Generation)?;
        let signer = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        let mut spki = ED25519_SPKI_PREFIX.to_vec();
        spki.extend_from_slice(signer.public_key().as_ref());

        let keys = GeneratedKeys {
            private_pem: pem::encode(&pem::Pem::new("PRIVATE KEY", pkcs8.as_ref().to_vec())),
            public_pem: pem::encode(&pem::Pem::new("PUBLIC KEY", spki)),
        };
        let pair = Self::ed25519(&keys.private_pem, Some(&keys.public_pem))?;
        Ok((pair, keys))
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

fn parse_algorithm(name: &str) -> Result<Algorithm, KeyError> {
    let algorithm: Algorithm = name
        .trim()
        .parse()
        .map_err(|_| KeyError::UnknownAlgorithm(name.to_string()))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Err(KeyError::SymmetricAlgorithm(algorithm))
        }
        other => Ok(other),
    }
}

/// Accepts SPKI (`PUBLIC KEY`) or a legacy block holding the raw key.
fn ed25519_public_from_pem(text: &str) -> Result<Vec<u8>, KeyError> {
    let block = pem::parse(text).map_err(|e| KeyError::InvalidPem(e.to_string()))?;
    let der = block.contents();
    if der.len() == ED25519_SPKI_PREFIX.len() + ED25519_PUBLIC_KEY_LEN
        && der.starts_with(&ED25519_SPKI_PREFIX)
    {
        return Ok(der[ED25519_SPKI_PREFIX.len()..].to_vec());
    }
    if der.len() == ED25519_PUBLIC_KEY_LEN {
        return Ok(der.to_vec());
    }
    Err(KeyError::InvalidKey(format!(
        "unsupported Ed25519 public key encoding ({} bytes, tag {})",
        der.len(),
        block.tag()
    )))
}
