use std::{sync::Arc, time::Duration};

use axum::http::{HeaderMap, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

use crate::services::auth::key_source::{KeySource, KeySourceError};

/// Why a presented bearer token was not accepted. Every variant maps to 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("malformed token")]
    MalformedToken,
    #[error("unknown issuer")]
    UnknownIssuer,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("key source unavailable")]
    KeySourceUnavailable,
}

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => Self::SignatureInvalid,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidIssuer => Self::UnknownIssuer,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            _ => Self::MalformedToken,
        }
    }
}

impl From<KeySourceError> for VerificationError {
    fn from(e: KeySourceError) -> Self {
        match e {
            KeySourceError::UnknownIssuer(_) | KeySourceError::UnknownKey(_) => Self::UnknownIssuer,
            KeySourceError::Unavailable(_) => Self::KeySourceUnavailable,
        }
    }
}

/// Verified token payload.
///
/// Only produced by `TokenVerifier::verify`, i.e. after signature, issuer and
/// time validation (`exp`/`nbf` are checked by `jsonwebtoken`, not kept).
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimSet {
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "sub", default)]
    pub subject: Option<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub roles: Option<Vec<String>>,
    // space-delimited
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub scopes: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

// `"roles": "ROLE_ADMIN"` reads as a one-element list
fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(list) => list,
        }),
    )
}

/// Verification knobs. Kept apart from `Config` so the verifier stays testable.
#[derive(Debug, Clone)]
pub struct VerifierPolicy {
    pub trusted_issuers: Vec<String>,
    // `None` disables the `aud` check
    pub audience: Option<String>,
    pub algorithms: Vec<Algorithm>,
    pub leeway_seconds: u64,
    pub key_resolve_timeout: Duration,
}

/// Extract the bearer credential from `Authorization`.
///
/// - `Ok(None)`: no header, or a non-bearer scheme (treated as anonymous)
/// - `Ok(Some(token))`: bearer credential present (not yet verified)
/// - `Err(MalformedToken)`: bearer scheme with an unusable credential
pub fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, VerificationError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| VerificationError::MalformedToken)?
        .trim();

    let (scheme, credential) = value.split_once(' ').unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }

    match credential.trim() {
        "" => Err(VerificationError::MalformedToken),
        token => Ok(Some(token)),
    }
}

#[derive(Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: Option<String>,
}

// The key source is selected by issuer, so `iss` has to be read before the
// signature can be checked. The value is re-validated by `jsonwebtoken::decode`.
fn peek_issuer(token: &str) -> Result<String, VerificationError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or(VerificationError::MalformedToken)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| VerificationError::MalformedToken)?;
    let peek: UnverifiedIssuer =
        serde_json::from_slice(&bytes).map_err(|_| VerificationError::MalformedToken)?;

    peek.iss
        .filter(|iss| !iss.trim().is_empty())
        .ok_or(VerificationError::UnknownIssuer)
}

/// Bearer token verifier: signature, issuer, `exp`/`nbf`, optional `aud`.
#[derive(Clone)]
pub struct TokenVerifier {
    key_source: Arc<dyn KeySource>,
    policy: VerifierPolicy,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("policy", &self.policy)
            .finish()
    }
}

impl TokenVerifier {
    pub fn new(key_source: Arc<dyn KeySource>, policy: VerifierPolicy) -> Self {
        Self { key_source, policy }
    }

    pub async fn verify(&self, token: &str) -> Result<ClaimSet, VerificationError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|_| VerificationError::MalformedToken)?;

        if !self.policy.algorithms.contains(&header.alg) {
            debug!(alg = ?header.alg, "token algorithm not allowed");
            return Err(VerificationError::MalformedToken);
        }

        let issuer = peek_issuer(token)?;
        if !self.policy.trusted_issuers.iter().any(|t| *t == issuer) {
            debug!(%issuer, "token issuer not trusted");
            return Err(VerificationError::UnknownIssuer);
        }

        let key = tokio::time::timeout(
            self.policy.key_resolve_timeout,
            self.key_source.resolve_key(&issuer, header.kid.as_deref()),
        )
        .await
        .map_err(|_| VerificationError::KeySourceUnavailable)??;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_nbf = true;
        validation.leeway = self.policy.leeway_seconds;
        match &self.policy.audience {
            Some(aud) => validation.set_audience(&[aud.as_str()]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<ClaimSet>(token, &key, &validation)?;

        Ok(data.claims)
    }
}
