// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup into an
//! immutable [`AppConfig`]. `APP_ENV` selects the default header and error
//! bundles; every individual knob can still be overridden.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` / `PORT` | Server bind address | `0.0.0.0` / `8080` |
//! | `APP_ENV` | `development` or `production` | `development` |
//! | `JWT_ALGORITHM` | Asymmetric signing algorithm | `EdDSA` |
//! | `JWT_PRIVATE_KEY_PEM` | Signing key (PEM) | Ephemeral in development |
//! | `JWT_PUBLIC_KEY_PEM` | Verification key (PEM) | Derived when possible |
//! | `JWT_ISSUER` / `JWT_AUDIENCE` | Required claim values | `wedding-api` / `wedding-app` |
//! | `JWT_ACCESS_TTL_SECS` / `JWT_REFRESH_TTL_SECS` | Credential lifetimes | `900` / `604800` |
//! | `REDIS_URL` | Shared denylist backend | In-memory when unset |
//! | `DENYLIST_TIMEOUT_MS` | Deadline for each denylist call | `250` |
//! | `TRUSTED_PROXIES` | Peers allowed to set `X-Forwarded-For` / `X-Real-IP` | none |
//! | `RATE_LIMIT_ENABLED` | Toggle per-route token buckets | `true` |
//! | `RATE_LIMIT_CLEANUP_SECS` / `RATE_LIMIT_ENTRY_TTL_SECS` | Bucket sweeper | `60` / `600` |
//! | `BRUTE_FORCE_*` | Abuse guard thresholds | see [`BruteForceConfig`] |
//! | `CORS_ALLOWED_ORIGINS` | Comma-separated origin list | `http://localhost:3000` |
//! | `CORS_STRICT_ORIGIN_CHECKING` | Refuse literal `*` | `true` in production |
//! | `SECURITY_CSP` / `SECURITY_HSTS_MAX_AGE_SECS` / `SECURITY_PERMISSIONS_POLICY` | Header overrides | env bundle |
//! | `ERROR_INCLUDE_STACK_TRACE` / `ERROR_LOG_DETAILED` | Error verbosity | `true` in development |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::security::rate_limit::{BucketPolicy, RouteClass};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const APP_ENV: &str = "APP_ENV";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const JWT_ALGORITHM_ENV: &str = "JWT_ALGORITHM";
pub const JWT_PRIVATE_KEY_ENV: &str = "JWT_PRIVATE_KEY_PEM";
pub const JWT_PUBLIC_KEY_ENV: &str = "JWT_PUBLIC_KEY_PEM";
pub const REDIS_URL_ENV: &str = "REDIS_URL";
pub const TRUSTED_PROXIES_ENV: &str = "TRUSTED_PROXIES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{0} is required in production")]
    Missing(&'static str),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(()),
        }
    }
}

/// Credential issuing and verification settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub algorithm: String,
    pub private_key_pem: Option<String>,
    pub public_key_pem: Option<String>,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: "EdDSA".to_string(),
            private_key_pem: None,
            public_key_pem: None,
            issuer: "wedding-api".to_string(),
            audience: "wedding-app".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Token-bucket policies, one per route class.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub auth: BucketPolicy,
    pub public_read: BucketPolicy,
    pub general: BucketPolicy,
    pub analytics: BucketPolicy,
    pub admin: BucketPolicy,
}

impl RateLimitConfig {
    pub fn policy(&self, class: RouteClass) -> &BucketPolicy {
        match class {
            RouteClass::Auth => &self.auth,
            RouteClass::PublicRead => &self.public_read,
            RouteClass::General => &self.general,
            RouteClass::Analytics => &self.analytics,
            RouteClass::Admin => &self.admin,
        }
    }

    fn with_sweep(mut self, cleanup_interval: Duration, entry_ttl: Duration) -> Self {
        for policy in [
            &mut self.auth,
            &mut self.public_read,
            &mut self.general,
            &mut self.analytics,
            &mut self.admin,
        ] {
            policy.cleanup_interval = cleanup_interval;
            policy.entry_ttl = entry_ttl;
        }
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 1 request per 12 s, burst 5
            auth: BucketPolicy::per_minute(5.0, 5),
            public_read: BucketPolicy::per_minute(100.0, 20),
            general: BucketPolicy::per_minute(1000.0, 50),
            analytics: BucketPolicy::per_second(10.0, 50),
            // 1 request per 30 s, burst 3
            admin: BucketPolicy::per_minute(2.0, 3),
        }
    }
}

/// Abuse guard thresholds.
#[derive(Debug, Clone)]
pub struct BruteForceConfig {
    pub max_attempts: u32,
    pub attempt_window: Duration,
    pub block_duration: Duration,
    pub cleanup_interval: Duration,
    pub track_by_ip: bool,
    pub track_by_email: bool,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_window: Duration::from_secs(15 * 60),
            block_duration: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
            track_by_ip: true,
            track_by_email: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    pub content_security_policy: Option<String>,
    pub hsts_max_age: Option<Duration>,
    pub hsts_preload: bool,
    pub frame_options: String,
    pub xss_protection: String,
    pub referrer_policy: String,
    pub permissions_policy: Option<String>,
    pub cross_origin_opener_policy: String,
    pub cross_origin_resource_policy: String,
    pub cross_origin_embedder_policy: Option<String>,
}

impl SecurityHeadersConfig {
    pub fn for_environment(env: Environment) -> Self {
        let base = Self {
            content_security_policy: Some(
                "default-src 'self'; img-src 'self' data: https:; style-src 'self' 'unsafe-inline'; \
                 script-src 'self'; frame-ancestors 'none'; base-uri 'self'; form-action 'self'"
                    .to_string(),
            ),
            hsts_max_age: None,
            hsts_preload: false,
            frame_options: "DENY".to_string(),
            xss_protection: "1; mode=block".to_string(),
            referrer_policy: "strict-origin-when-cross-origin".to_string(),
            permissions_policy: Some(
                "camera=(), microphone=(), geolocation=(), payment=()".to_string(),
            ),
            cross_origin_opener_policy: "same-origin".to_string(),
            cross_origin_resource_policy: "same-site".to_string(),
            cross_origin_embedder_policy: None,
        };
        match env {
            Environment::Development => base,
            Environment::Production => Self {
                hsts_max_age: Some(Duration::from_secs(365 * 24 * 3600)),
                hsts_preload: true,
                cross_origin_embedder_policy: Some("require-corp".to_string()),
                ..base
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Duration,
    pub strict_origin_checking: bool,
}

impl CorsConfig {
    pub fn for_environment(env: Environment) -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: ["Authorization", "Content-Type", "X-Request-Id"]
                .into_iter()
                .map(String::from)
                .collect(),
            allow_credentials: true,
            max_age: Duration::from_secs(600),
            strict_origin_checking: env == Environment::Production,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorHandlingConfig {
    pub include_stack_trace: bool,
    pub log_detailed_errors: bool,
}

impl ErrorHandlingConfig {
    pub fn for_environment(env: Environment) -> Self {
        let dev = env == Environment::Development;
        Self {
            include_stack_trace: dev,
            log_detailed_errors: dev,
        }
    }
}

/// Complete runtime configuration. Immutable after startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub auth: AuthConfig,
    pub redis_url: Option<String>,
    pub denylist_timeout: Duration,
    /// Socket peers whose forwarding headers name the real client.
    pub trusted_proxies: Vec<IpAddr>,
    pub rate_limit: RateLimitConfig,
    pub brute_force: BruteForceConfig,
    pub security_headers: SecurityHeadersConfig,
    pub cors: CorsConfig,
    pub error_handling: ErrorHandlingConfig,
}

impl AppConfig {
    /// Defaults for the given environment without reading any variables.
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth: AuthConfig::default(),
            redis_url: None,
            denylist_timeout: Duration::from_millis(250),
            trusted_proxies: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            brute_force: BruteForceConfig::default(),
            security_headers: SecurityHeadersConfig::for_environment(environment),
            cors: CorsConfig::for_environment(environment),
            error_handling: ErrorHandlingConfig::for_environment(environment),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Vars { lookup };
        let environment: Environment = match env.raw(APP_ENV) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                name: APP_ENV,
                value,
            })?,
            None => Environment::Development,
        };

        let mut config = Self::for_environment(environment);
        config.host = env.raw(HOST_ENV).unwrap_or(config.host);
        config.port = env.parse(PORT_ENV, config.port)?;

        config.auth.algorithm = env.raw(JWT_ALGORITHM_ENV).unwrap_or(config.auth.algorithm);
        config.auth.private_key_pem = env.raw(JWT_PRIVATE_KEY_ENV);
        config.auth.public_key_pem = env.raw(JWT_PUBLIC_KEY_ENV);
        config.auth.issuer = env.raw("JWT_ISSUER").unwrap_or(config.auth.issuer);
        config.auth.audience = env.raw("JWT_AUDIENCE").unwrap_or(config.auth.audience);
        config.auth.access_ttl = env.secs("JWT_ACCESS_TTL_SECS", config.auth.access_ttl)?;
        config.auth.refresh_ttl = env.secs("JWT_REFRESH_TTL_SECS", config.auth.refresh_ttl)?;
        if config.auth.refresh_ttl < config.auth.access_ttl {
            return Err(ConfigError::InvalidValue {
                name: "JWT_REFRESH_TTL_SECS",
                value: config.auth.refresh_ttl.as_secs().to_string(),
            });
        }
        if environment == Environment::Production && config.auth.private_key_pem.is_none() {
            return Err(ConfigError::Missing(JWT_PRIVATE_KEY_ENV));
        }

        config.redis_url = env.raw(REDIS_URL_ENV);
        config.denylist_timeout = Duration::from_millis(
            env.parse("DENYLIST_TIMEOUT_MS", config.denylist_timeout.as_millis() as u64)?,
        );

        if let Some(proxies) = env.raw(TRUSTED_PROXIES_ENV) {
            config.trusted_proxies = proxies
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    p.parse().map_err(|_| ConfigError::InvalidValue {
                        name: TRUSTED_PROXIES_ENV,
                        value: p.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        config.rate_limit.enabled = env.parse("RATE_LIMIT_ENABLED", config.rate_limit.enabled)?;
        let cleanup = env.secs("RATE_LIMIT_CLEANUP_SECS", Duration::from_secs(60))?;
        let entry_ttl = env.secs("RATE_LIMIT_ENTRY_TTL_SECS", Duration::from_secs(600))?;
        config.rate_limit = config.rate_limit.with_sweep(cleanup, entry_ttl);

        let bf = &mut config.brute_force;
        bf.max_attempts = env.parse("BRUTE_FORCE_MAX_ATTEMPTS", bf.max_attempts)?;
        bf.attempt_window = env.secs("BRUTE_FORCE_WINDOW_SECS", bf.attempt_window)?;
        bf.block_duration = env.secs("BRUTE_FORCE_BLOCK_SECS", bf.block_duration)?;
        bf.cleanup_interval = env.secs("BRUTE_FORCE_CLEANUP_SECS", bf.cleanup_interval)?;
        bf.track_by_ip = env.parse("BRUTE_FORCE_TRACK_IP", bf.track_by_ip)?;
        bf.track_by_email = env.parse("BRUTE_FORCE_TRACK_EMAIL", bf.track_by_email)?;

        if let Some(origins) = env.raw("CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        config.cors.strict_origin_checking =
            env.parse("CORS_STRICT_ORIGIN_CHECKING", config.cors.strict_origin_checking)?;
        config.cors.max_age = env.secs("CORS_MAX_AGE_SECS", config.cors.max_age)?;

        if let Some(csp) = env.raw("SECURITY_CSP") {
            config.security_headers.content_security_policy = Some(csp);
        }
        if let Some(policy) = env.raw("SECURITY_PERMISSIONS_POLICY") {
            config.security_headers.permissions_policy = Some(policy);
        }
        if env.raw("SECURITY_HSTS_MAX_AGE_SECS").is_some() {
            let max_age = env.secs("SECURITY_HSTS_MAX_AGE_SECS", Duration::ZERO)?;
            config.security_headers.hsts_max_age = (!max_age.is_zero()).then_some(max_age);
        }

        config.error_handling.include_stack_trace = env.parse(
            "ERROR_INCLUDE_STACK_TRACE",
            config.error_handling.include_stack_trace,
        )?;
        config.error_handling.log_detailed_errors =
            env.parse("ERROR_LOG_DETAILED", config.error_handling.log_detailed_errors)?;

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.raw(name) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value }),
            None => Ok(default),
        }
    }

    fn secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(name, default.as_secs()).map(Duration::from_secs)
    }
}
