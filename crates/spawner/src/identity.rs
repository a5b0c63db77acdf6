//! Session identity extraction.
//!
//! Every per-session URL lives under `/u/<id>`. The id doubles as a routing
//! key and as part of a container name, so it is restricted to
//! `[A-Za-z0-9._-]` before it reaches either.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Default prefix for canonical container names.
pub const DEFAULT_CONTAINER_PREFIX: &str = "browser_";

/// Path segment under which every session is mounted.
pub const SESSION_PATH_ROOT: &str = "/u";

static SESSION_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/u/(?P<id>[A-Za-z0-9._-]+)(?:/.*)?$").expect("session path regex is valid")
});

/// A validated session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Parse a bare identifier, applying the same character rules as path extraction.
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.is_empty() && raw.chars().all(is_id_char) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical container name for this session.
    ///
    /// Concatenating a fixed prefix is injective, which is what keeps one
    /// container per identifier.
    pub fn container_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }

    /// The URL prefix routed to this session's container (`/u/<id>`).
    pub fn path_prefix(&self) -> String {
        format!("{}/{}", SESSION_PATH_ROOT, self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

/// Extract the session identifier from a request path.
///
/// Matches `/u/<id>` optionally followed by `/<anything>`. Returns `None` for
/// every other shape, including `/`, `/u/` and ids with disallowed characters.
pub fn extract_session_id(path: &str) -> Option<SessionId> {
    SESSION_PATH_RE
        .captures(path)
        .and_then(|caps| caps.name("id"))
        .map(|m| SessionId(m.as_str().to_string()))
}

/// Strip the query string (and fragment) from a request URI.
pub fn path_of(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    &uri[..end]
}
