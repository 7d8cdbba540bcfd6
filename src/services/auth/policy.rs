//! Path-based authorization rules.
//!
//! Rules are evaluated in declaration order and the first rule whose pattern
//! matches the request path decides. A path that matches no rule requires an
//! authenticated caller.
//!
//! Rule tables are written as `pattern=condition` entries separated by `;`:
//!
//! ```text
//! /auth/**=permit_all;/api/admin/**=role:ADMIN;/api/data/**=scope:read
//! ```
//!
//! Conditions: `permit_all`, `authenticated`, `role:<NAME>`, `scope:<name>`.

use std::fmt;

use thiserror::Error;

use crate::services::auth::authority::{Authority, AuthoritySet};

const ROLE_PREFIX: &str = "ROLE_";

// Applied when no rule matches
static DEFAULT_CONDITION: Condition = Condition::RequireAuthenticated;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("invalid path pattern: {0:?}")]
    InvalidPattern(String),
    #[error("invalid condition: {0:?}")]
    InvalidCondition(String),
    #[error("invalid rule entry (expected pattern=condition): {0:?}")]
    InvalidEntry(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    // `*` or `{name}`: exactly one non-empty segment
    Wildcard,
}

/// Hierarchical glob over `/`-separated path segments.
///
/// - `*` and `{name}` match exactly one segment
/// - a trailing `**` matches the prefix itself and everything nested under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    nested: bool,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, RuleParseError> {
        let raw = raw.trim();
        let invalid = || RuleParseError::InvalidPattern(raw.to_string());

        let rest = raw.strip_prefix('/').ok_or_else(invalid)?;
        let mut parts: Vec<&str> = rest.split('/').collect();

        let nested = parts.last() == Some(&"**");
        if nested {
            parts.pop();
        }
        // "/" and "/api/" carry one trailing empty segment
        if parts.last() == Some(&"") {
            parts.pop();
        }

        let segments = parts
            .into_iter()
            .map(|part| match part {
                "" | "**" => Err(invalid()),
                "*" => Ok(Segment::Wildcard),
                p if p.starts_with('{') && p.ends_with('}') => Ok(Segment::Wildcard),
                p => Ok(Segment::Literal(p.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            segments,
            nested,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix('/') else {
            return false;
        };

        let mut parts: Vec<&str> = rest.split('/').collect();
        // A single trailing separator is ignored ("/api/x/" == "/api/x")
        if parts.last() == Some(&"") {
            parts.pop();
        }

        let len_ok = if self.nested {
            parts.len() >= self.segments.len()
        } else {
            parts.len() == self.segments.len()
        };

        len_ok
            && self
                .segments
                .iter()
                .zip(parts.iter())
                .all(|(seg, part)| match seg {
                    Segment::Literal(lit) => lit == part,
                    Segment::Wildcard => !part.is_empty(),
                })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    PermitAll,
    /// Holds the full role authority name (`ROLE_` prefixed).
    RequireRole(String),
    /// Holds the upper-cased scope name.
    RequireScope(String),
    RequireAuthenticated,
}

impl Condition {
    /// `ADMIN` and `ROLE_ADMIN` both require the `ROLE_ADMIN` authority.
    pub fn role(name: &str) -> Self {
        let name = name.trim();
        if name.starts_with(ROLE_PREFIX) {
            Self::RequireRole(name.to_string())
        } else {
            Self::RequireRole(format!("{ROLE_PREFIX}{name}"))
        }
    }

    pub fn scope(name: &str) -> Self {
        Self::RequireScope(name.trim().to_uppercase())
    }

    pub fn parse(raw: &str) -> Result<Self, RuleParseError> {
        let raw = raw.trim();
        let invalid = || RuleParseError::InvalidCondition(raw.to_string());

        if let Some((kind, name)) = raw.split_once(':') {
            if name.trim().is_empty() {
                return Err(invalid());
            }
            return match kind.trim().to_ascii_lowercase().as_str() {
                "role" => Ok(Self::role(name)),
                "scope" => Ok(Self::scope(name)),
                _ => Err(invalid()),
            };
        }

        match raw.to_ascii_lowercase().as_str() {
            "permit_all" | "permitall" => Ok(Self::PermitAll),
            "authenticated" => Ok(Self::RequireAuthenticated),
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub pattern: PathPattern,
    pub condition: Condition,
}

impl PathRule {
    pub fn new(pattern: PathPattern, condition: Condition) -> Self {
        Self { pattern, condition }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Permit,
    DenyUnauthenticated,
    DenyForbidden,
}

#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    rules: Vec<PathRule>,
}

impl AccessPolicy {
    pub fn new(rules: Vec<PathRule>) -> Self {
        Self { rules }
    }

    /// Parse a `pattern=condition;...` table. Empty entries are skipped.
    pub fn parse(table: &str) -> Result<Self, RuleParseError> {
        let rules = table
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (pattern, condition) = entry
                    .split_once('=')
                    .ok_or_else(|| RuleParseError::InvalidEntry(entry.to_string()))?;
                Ok(PathRule::new(
                    PathPattern::parse(pattern)?,
                    Condition::parse(condition)?,
                ))
            })
            .collect::<Result<Vec<_>, RuleParseError>>()?;

        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    /// First matching rule wins; no match falls back to `RequireAuthenticated`.
    pub fn condition_for(&self, path: &str) -> &Condition {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .map(|rule| &rule.condition)
            .unwrap_or(&DEFAULT_CONDITION)
    }

    pub fn decide(
        &self,
        path: &str,
        authorities: &AuthoritySet,
        is_authenticated: bool,
    ) -> Decision {
        let required = match self.condition_for(path) {
            Condition::PermitAll => return Decision::Permit,
            Condition::RequireAuthenticated => {
                return if is_authenticated {
                    Decision::Permit
                } else {
                    Decision::DenyUnauthenticated
                };
            }
            Condition::RequireRole(role) => Authority::Role(role.clone()),
            Condition::RequireScope(scope) => Authority::scope(scope),
        };

        if authorities.contains(&required) {
            Decision::Permit
        } else if is_authenticated {
            Decision::DenyForbidden
        } else {
            Decision::DenyUnauthenticated
        }
    }
}
