//! Trusted signing-key sources (`resolve_key(issuer)`).
//!
//! The verifier only depends on the `KeySource` trait. Caching, refresh and
//! transport retries are the key source's business; the verifier bounds each
//! call with its own timeout and never retries.

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use thiserror::Error;

pub mod jwks;

pub use jwks::JwksKeySource;

#[derive(Debug, Error)]
pub enum KeySourceError {
    #[error("issuer has no known key set: {0}")]
    UnknownIssuer(String),
    #[error("no key matches kid {0:?}")]
    UnknownKey(Option<String>),
    #[error("key source unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KeySource: Send + Sync {
    async fn resolve_key(
        &self,
        issuer: &str,
        kid: Option<&str>,
    ) -> Result<DecodingKey, KeySourceError>;
}

/// Fixed per-issuer keys (e.g. a PEM public key from configuration).
///
/// The `kid` header is ignored: each issuer maps to exactly one key.
#[derive(Clone, Default)]
pub struct StaticKeySource {
    keys: HashMap<String, DecodingKey>,
}

impl std::fmt::Debug for StaticKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("StaticKeySource")
            .field("issuers", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, issuer: impl Into<String>, key: DecodingKey) -> Self {
        self.keys.insert(issuer.into(), key);
        self
    }

    /// One Ed25519 public key (SPKI PEM) shared by every listed issuer.
    pub fn from_ed_pem(issuers: &[String], public_key_pem: &str) -> Result<Self, KeySourceError> {
        let key = DecodingKey::from_ed_pem(public_key_pem.as_bytes())
            .map_err(|e| KeySourceError::Unavailable(format!("invalid ed25519 public key pem: {e}")))?;

        Ok(issuers
            .iter()
            .fold(Self::new(), |source, issuer| source.with_key(issuer.clone(), key.clone())))
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn resolve_key(
        &self,
        issuer: &str,
        _kid: Option<&str>,
    ) -> Result<DecodingKey, KeySourceError> {
        self.keys
            .get(issuer)
            .cloned()
            .ok_or_else(|| KeySourceError::UnknownIssuer(issuer.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ISSUER, PUBLIC_KEY_PEM};

    #[tokio::test]
    async fn static_source_resolves_configured_issuer() {
        let source = StaticKeySource::from_ed_pem(&[ISSUER.to_string()], PUBLIC_KEY_PEM).unwrap();

        assert!(source.resolve_key(ISSUER, Some("any")).await.is_ok());
        assert!(matches!(
            source.resolve_key("https://elsewhere", None).await,
            Err(KeySourceError::UnknownIssuer(_))
        ));
    }

    #[test]
    fn static_source_rejects_bad_pem() {
        assert!(matches!(
            StaticKeySource::from_ed_pem(&[ISSUER.to_string()], "not a pem"),
            Err(KeySourceError::Unavailable(_))
        ));
    }
}
