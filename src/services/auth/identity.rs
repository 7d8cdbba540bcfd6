//! Identity propagation to downstream services.
//!
//! `X-User-*` headers are gateway-controlled: whatever the client sent is
//! always removed before the trusted values are written.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::services::auth::{authority::AuthoritySet, token::ClaimSet};

pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_ROLES: HeaderName = HeaderName::from_static("x-user-roles");
pub const X_USER_SCOPES: HeaderName = HeaderName::from_static("x-user-scopes");

const IDENTITY_HEADER_PREFIX: &str = "x-user-";

/// Remove every client-supplied `X-User-*` header.
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    let spoofed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(IDENTITY_HEADER_PREFIX))
        .cloned()
        .collect();

    for name in spoofed {
        warn!(header = %name, "dropping client-supplied identity header");
        headers.remove(&name);
    }
}

/// Strip client identity headers, then (for an authenticated caller) write
/// `X-User-ID`, `X-User-Roles` and `X-User-Scopes`. Absent values are omitted.
pub fn forward_identity(headers: &mut HeaderMap, identity: Option<(&ClaimSet, &AuthoritySet)>) {
    strip_identity_headers(headers);

    let Some((claims, authorities)) = identity else {
        return;
    };

    if let Some(subject) = claims.subject.as_deref() {
        set(headers, X_USER_ID, subject);
    }

    let roles = authorities.roles().collect::<Vec<_>>().join(",");
    if !roles.is_empty() {
        set(headers, X_USER_ROLES, &roles);
    }

    let scopes = authorities.scopes().collect::<Vec<_>>().join(",");
    if !scopes.is_empty() {
        set(headers, X_USER_SCOPES, &scopes);
    }
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            debug!(header = %name, value = %value, "forwarding identity header");
            headers.insert(name, v);
        }
        // e.g. a subject containing control characters
        Err(_) => warn!(header = %name, "identity value is not a valid header value; omitted"),
    }
}
