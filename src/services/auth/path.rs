//! Request-path canonicalization.
//!
//! Rules are matched against the canonical path and the same path is what the
//! upstream receives, so the two can never disagree about where a request goes.
//!
//! - `%XX` escapes of unreserved characters (`A-Z a-z 0-9 - . _ ~`) are decoded
//! - remaining escapes are kept, upper-cased
//! - dot segments, empty segments (`//`), `;`, `\` and escaped `/`, `\`, `%`,
//!   `;` or NUL are rejected outright
//!
//! A single trailing `/` is preserved.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is not absolute")]
    NotAbsolute,
    #[error("invalid percent-encoding")]
    InvalidEncoding,
    #[error("forbidden character in path")]
    ForbiddenCharacter,
    #[error("dot segment in path")]
    DotSegment,
    #[error("empty segment in path")]
    EmptySegment,
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn hex(b: u8) -> Option<u8> {
    char::from(b).to_digit(16).map(|d| d as u8)
}

fn decode_unreserved(raw: &str) -> Result<String, PathError> {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let (hi, lo) = match (bytes.get(i + 1), bytes.get(i + 2)) {
                    (Some(&hi), Some(&lo)) => (hi, lo),
                    _ => return Err(PathError::InvalidEncoding),
                };
                let decoded = hex(hi)
                    .zip(hex(lo))
                    .map(|(h, l)| (h << 4) | l)
                    .ok_or(PathError::InvalidEncoding)?;

                if is_unreserved(decoded) {
                    out.push(char::from(decoded));
                } else if matches!(decoded, b'/' | b'\\' | b'%' | b';' | 0) {
                    return Err(PathError::ForbiddenCharacter);
                } else {
                    out.push('%');
                    out.push(char::from(hi).to_ascii_uppercase());
                    out.push(char::from(lo).to_ascii_uppercase());
                }
                i += 3;
            }
            b'\\' | b';' => return Err(PathError::ForbiddenCharacter),
            b => {
                out.push(char::from(b));
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Canonical form of a request path, or why it is refused.
pub fn canonicalize(raw: &str) -> Result<String, PathError> {
    if !raw.starts_with('/') {
        return Err(PathError::NotAbsolute);
    }
    if !raw.is_ascii() {
        return Err(PathError::ForbiddenCharacter);
    }

    let decoded = decode_unreserved(raw)?;

    let rest = &decoded[1..];
    let body = rest.strip_suffix('/').unwrap_or(rest);
    if body.is_empty() {
        return match rest {
            "" => Ok(decoded),
            // "//"
            _ => Err(PathError::EmptySegment),
        };
    }

    for segment in body.split('/') {
        match segment {
            "" => return Err(PathError::EmptySegment),
            "." | ".." => return Err(PathError::DotSegment),
            _ => {}
        }
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_are_unchanged() {
        assert_eq!(canonicalize("/").unwrap(), "/");
        assert_eq!(canonicalize("/api/admin/ops").unwrap(), "/api/admin/ops");
        assert_eq!(canonicalize("/api/data/").unwrap(), "/api/data/");
        assert_eq!(canonicalize("/files/v1.2/a..b").unwrap(), "/files/v1.2/a..b");
    }

    #[test]
    fn unreserved_escapes_are_decoded() {
        assert_eq!(canonicalize("/api/%61dmin/ops").unwrap(), "/api/admin/ops");
        assert_eq!(canonicalize("/api/%41%2D%7e").unwrap(), "/api/A-~");
    }

    #[test]
    fn other_escapes_are_kept_upper_cased() {
        assert_eq!(canonicalize("/search/a%20b").unwrap(), "/search/a%20b");
        assert_eq!(canonicalize("/search/%c3%a9").unwrap(), "/search/%C3%A9");
    }

    #[test]
    fn dot_segments_are_rejected() {
        for raw in [
            "/public/../api/admin/ops",
            "/public/./x",
            "/public/%2e%2e/api/admin/ops",
            "/public/.%2E/api",
            "/api/..",
        ] {
            assert_eq!(canonicalize(raw), Err(PathError::DotSegment), "{raw}");
        }
    }

    #[test]
    fn empty_segments_are_rejected() {
        assert_eq!(canonicalize("//api/admin"), Err(PathError::EmptySegment));
        assert_eq!(canonicalize("/api//admin"), Err(PathError::EmptySegment));
        assert_eq!(canonicalize("/api/admin//"), Err(PathError::EmptySegment));
        assert_eq!(canonicalize("//"), Err(PathError::EmptySegment));
    }

    #[test]
    fn separators_and_parameters_cannot_be_smuggled() {
        for raw in [
            "/api%2fadmin/ops",
            "/api%5Cadmin",
            "/api\\admin",
            "/api/admin;jsessionid=1/ops",
            "/api/admin%3b/ops",
            "/api/%252e%252e/admin",
            "/api/%00",
        ] {
            assert_eq!(canonicalize(raw), Err(PathError::ForbiddenCharacter), "{raw}");
        }
    }

    #[test]
    fn broken_escapes_and_relative_paths() {
        assert_eq!(canonicalize("/api/%6"), Err(PathError::InvalidEncoding));
        assert_eq!(canonicalize("/api/%zz"), Err(PathError::InvalidEncoding));
        assert_eq!(canonicalize("api/admin"), Err(PathError::NotAbsolute));
    }
}
