//! Per-request authentication → authorization → identity propagation.
//!
//! Fixed stage order:
//! 0. canonicalize the path (refused paths → 400); rules and upstream both
//!    see the canonical form
//! 1. extract the bearer credential (absent → anonymous)
//! 2. verify it (any failure → 401, rules are never consulted)
//! 3. map claims to authorities
//! 4. evaluate the path rules (401 / 403 / permit)
//! 5. rewrite the outbound identity headers
//!
//! Claims and authorities are threaded through as values; nothing is stored
//! between requests.

use axum::http::{Uri, request::Parts, uri::PathAndQuery};
use tracing::{debug, info, warn};

use crate::services::auth::{
    authority::{self, AuthoritySet},
    identity, path,
    policy::{AccessPolicy, Decision},
    token::{self, TokenVerifier},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadRequest,
    Unauthenticated,
    Forbidden,
}

/// Outcome of an admitted request (for logging / tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Anonymous,
    Authenticated { subject: Option<String> },
}

#[derive(Debug, Clone)]
pub struct AuthPipeline {
    verifier: TokenVerifier,
    policy: AccessPolicy,
}

impl AuthPipeline {
    pub fn new(verifier: TokenVerifier, policy: AccessPolicy) -> Self {
        Self { verifier, policy }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Decide on the request and, when admitted, rewrite its identity headers
    /// in place. The URI path is replaced by its canonical form; the query is
    /// kept.
    pub async fn admit(&self, parts: &mut Parts) -> Result<Admission, Rejection> {
        let path = path::canonicalize(parts.uri.path()).map_err(|err| {
            warn!(error = %err, path = %parts.uri.path(), "refusing request path");
            Rejection::BadRequest
        })?;
        if path != parts.uri.path() {
            parts.uri = with_path(&parts.uri, &path).ok_or(Rejection::BadRequest)?;
        }

        let bearer = token::extract_bearer(&parts.headers).map_err(|err| {
            warn!(error = %err, %path, "unusable authorization header");
            Rejection::Unauthenticated
        })?;

        let claims = match bearer {
            None => None,
            Some(raw) => match self.verifier.verify(raw).await {
                Ok(claims) => {
                    debug!(issuer = %claims.issuer, subject = ?claims.subject, "bearer token verified");
                    Some(claims)
                }
                Err(err) => {
                    warn!(error = %err, %path, "bearer token rejected");
                    return Err(Rejection::Unauthenticated);
                }
            },
        };

        let authorities = claims
            .as_ref()
            .map(authority::map_claims)
            .unwrap_or_else(AuthoritySet::default);

        match self.policy.decide(&path, &authorities, claims.is_some()) {
            Decision::Permit => {}
            Decision::DenyUnauthenticated => {
                info!(%path, "authentication required");
                return Err(Rejection::Unauthenticated);
            }
            Decision::DenyForbidden => {
                info!(
                    %path,
                    subject = claims.as_ref().and_then(|c| c.subject.as_deref()),
                    %authorities,
                    "insufficient authority"
                );
                return Err(Rejection::Forbidden);
            }
        }

        identity::forward_identity(
            &mut parts.headers,
            claims.as_ref().map(|c| (c, &authorities)),
        );

        Ok(match claims {
            None => Admission::Anonymous,
            Some(c) => Admission::Authenticated { subject: c.subject },
        })
    }
}

fn with_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}
