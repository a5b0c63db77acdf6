//! Per-session basic-auth credentials for the browser container's web UI.

use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};

use crate::identity::SessionId;

const PASSWORD_LEN: usize = 32;

/// Password for a session container.
///
/// With an operator secret the password is derived deterministically so it
/// can be recomputed later (`spawner credentials <id>`). Without one, a fresh
/// random password is generated for every new container.
pub fn session_password(secret: Option<&str>, session: &SessionId) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => derive_password(secret, session),
        _ => random_password(),
    }
}

/// `hex(sha256(secret ":" id))`, truncated.
pub fn derive_password(secret: &str, session: &SessionId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(session.as_str().as_bytes());
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(PASSWORD_LEN);
    encoded
}

pub fn random_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}
