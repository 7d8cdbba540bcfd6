/*
 * Responsibility
 * - Environment / .env loading (UPSTREAM_URL, issuers, key source, rules ...)
 * - Validation (missing or invalid values fail startup)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use url::Url;

use crate::services::auth::policy::AccessPolicy;

// Mirrors the classic gateway setup: auth + public endpoints open,
// admin by role, data by scope, everything else authenticated.
pub const DEFAULT_RULES: &str =
    "/auth/**=permit_all;/public/**=permit_all;/api/admin/**=role:ADMIN;/api/data/**=scope:read";

const DEFAULT_ALGORITHMS: &str = "RS256,ES256,EdDSA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: Option<String>) -> Self {
        match raw
            .unwrap_or_else(|| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where signing keys come from.
#[derive(Debug, Clone)]
pub enum KeySourceConfig {
    /// One Ed25519 public key (PEM) for every trusted issuer.
    StaticPem(String),
    /// Remote JWKS; `jwks_uri: None` means OpenID discovery per issuer.
    Jwks {
        jwks_uri: Option<Url>,
        cache_ttl: Duration,
        // Floor between refetches triggered by unknown `kid`s
        min_refresh_interval: Duration,
        valkey_url: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    pub upstream_url: Url,

    pub trusted_issuers: Vec<String>,
    pub audience: Option<String>,
    pub algorithms: Vec<Algorithm>,
    pub leeway_seconds: u64,
    pub key_resolve_timeout: Duration,
    pub key_source: KeySourceConfig,

    pub policy: AccessPolicy,
}

fn csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port: u16 = match lookup("PORT") {
            Some(s) => s.parse().map_err(|_| ConfigError::Invalid("PORT"))?,
            None => 8080,
        };
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(lookup("APP_ENV"));

        let upstream_url = lookup("UPSTREAM_URL").ok_or(ConfigError::Missing("UPSTREAM_URL"))?;
        let upstream_url =
            Url::parse(&upstream_url).map_err(|_| ConfigError::Invalid("UPSTREAM_URL"))?;

        let trusted_issuers = csv(&lookup("AUTH_ISSUERS").unwrap_or_default());
        if trusted_issuers.is_empty() {
            return Err(ConfigError::Missing("AUTH_ISSUERS"));
        }

        let audience = lookup("AUTH_AUDIENCE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let algorithms = csv(&lookup("AUTH_ALGORITHMS").unwrap_or_else(|| DEFAULT_ALGORITHMS.into()))
            .iter()
            .map(|s| Algorithm::from_str(s).map_err(|_| ConfigError::Invalid("AUTH_ALGORITHMS")))
            .collect::<Result<Vec<_>, _>>()?;
        if algorithms.is_empty() {
            return Err(ConfigError::Invalid("AUTH_ALGORITHMS"));
        }

        let leeway_seconds = lookup("ACCESS_TOKEN_LEEWAY_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);

        let key_resolve_timeout = Duration::from_millis(
            lookup("KEY_RESOLVE_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5_000),
        );

        let key_source = match lookup("ACCESS_JWT_PUBLIC_KEY_PEM") {
            Some(pem) if !pem.trim().is_empty() => {
                KeySourceConfig::StaticPem(pem.replace("\\n", "\n"))
            }
            _ => {
                let jwks_uri = lookup("AUTH_JWKS_URI")
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| Url::parse(s.trim()))
                    .transpose()
                    .map_err(|_| ConfigError::Invalid("AUTH_JWKS_URI"))?;
                let cache_ttl = Duration::from_secs(
                    lookup("JWKS_CACHE_TTL_SECONDS")
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(300),
                );
                let min_refresh_interval = Duration::from_secs(
                    lookup("JWKS_MIN_REFRESH_SECONDS")
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(30),
                );
                let valkey_url = lookup("VALKEY_URL").filter(|s| !s.trim().is_empty());

                KeySourceConfig::Jwks {
                    jwks_uri,
                    cache_ttl,
                    min_refresh_interval,
                    valkey_url,
                }
            }
        };

        let policy = AccessPolicy::parse(&lookup("GATEWAY_RULES").unwrap_or_else(|| DEFAULT_RULES.into()))
            .map_err(|_| ConfigError::Invalid("GATEWAY_RULES"))?;

        Ok(Self {
            addr,
            app_env,
            upstream_url,
            trusted_issuers,
            audience,
            algorithms,
            leeway_seconds,
            key_resolve_timeout,
            key_source,
            policy,
        })
    }
}
