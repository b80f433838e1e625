//! Bearer credential check for the trigger surface.
//!
//! Runs before anything touches the queue; a mismatch is `Error::Unauthorized`.

use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Validate an `Authorization` header value against the configured secret.
///
/// Accepts `Bearer <secret>` (scheme case-insensitive). Both sides are hashed
/// before comparing so the comparison length never depends on the input.
pub fn verify_bearer(authorization: Option<&str>, secret: &str) -> Result<()> {
    let Some(raw) = authorization else {
        return Err(Error::Unauthorized("missing authorization header".into()));
    };
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .ok_or_else(|| Error::Unauthorized("unsupported authorization scheme".into()))?
        .trim();
    if token.is_empty() || secret.is_empty() {
        return Err(Error::Unauthorized("invalid credential".into()));
    }
    if sha256(token.as_bytes()) != sha256(secret.as_bytes()) {
        return Err(Error::Unauthorized("invalid credential".into()));
    }
    Ok(())
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(bytes);
    h.finalize().into()
}
