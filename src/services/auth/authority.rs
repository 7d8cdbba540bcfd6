//! Claim → authority mapping.
//!
//! Roles are taken verbatim from the `roles` claim (the issuer already applies
//! the `ROLE_` prefix). Scopes come from the space-delimited `scope` claim or,
//! when that is absent, from the `scopes` list claim, and are upper-cased.

use std::fmt;

use crate::services::auth::token::ClaimSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Authority {
    Role(String),
    Scope(String),
}

impl Authority {
    pub fn scope(name: &str) -> Self {
        Self::Scope(name.to_uppercase())
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authority::Role(name) => f.write_str(name),
            Authority::Scope(name) => write!(f, "SCOPE_{name}"),
        }
    }
}

/// Insertion-ordered set of authorities; duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthoritySet {
    items: Vec<Authority>,
}

impl AuthoritySet {
    /// Returns `false` when the authority was already present.
    pub fn insert(&mut self, authority: Authority) -> bool {
        if self.items.contains(&authority) {
            return false;
        }
        self.items.push(authority);
        true
    }

    pub fn contains(&self, authority: &Authority) -> bool {
        self.items.contains(authority)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Authority> {
        self.items.iter()
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|a| match a {
            Authority::Role(name) => Some(name.as_str()),
            Authority::Scope(_) => None,
        })
    }

    /// Bare (unmarked) upper-cased scope names.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|a| match a {
            Authority::Scope(name) => Some(name.as_str()),
            Authority::Role(_) => None,
        })
    }
}

impl FromIterator<Authority> for AuthoritySet {
    fn from_iter<I: IntoIterator<Item = Authority>>(iter: I) -> Self {
        let mut set = Self::default();
        for authority in iter {
            set.insert(authority);
        }
        set
    }
}

impl fmt::Display for AuthoritySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        f.write_str("[")?;
        for a in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{a}")?;
            first = false;
        }
        f.write_str("]")
    }
}

/// Build the authority set for a verified claim set. Never fails.
pub fn map_claims(claims: &ClaimSet) -> AuthoritySet {
    let roles = claims
        .roles
        .iter()
        .flatten()
        .map(|role| Authority::Role(role.clone()));

    // `scope` (string) takes precedence over `scopes` (list)
    let scopes: Vec<&str> = match (&claims.scope, &claims.scopes) {
        (Some(scope), _) => scope.split(' ').filter(|s| !s.is_empty()).collect(),
        (None, Some(list)) => list.iter().map(String::as_str).collect(),
        (None, None) => Vec::new(),
    };

    let authorities: AuthoritySet = roles
        .chain(scopes.into_iter().map(Authority::scope))
        .collect();

    tracing::debug!(%authorities, "extracted authorities");

    authorities
}
