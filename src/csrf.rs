//! Per-session anti-forgery tokens.
//!
//! A token is bound to one session and presented back via the
//! `x-csrf-token` header on every state-changing, session-bound call.
//! Validation compares SHA-256 digests of the two values, so equality does
//! not leak through timing.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// Header state-changing requests carry the session's token in.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Create a new anti-forgery token for one session.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate csrf token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Whether the presented token matches the session-bound one.
#[must_use]
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let presented = Sha256::digest(presented.as_bytes());
    expected == presented
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_per_issue() {
        let first = generate_token().unwrap();
        let second = generate_token().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn matching_is_exact() {
        let token = generate_token().unwrap();
        assert!(tokens_match(&token, &token));
        assert!(!tokens_match(&token, ""));
        assert!(!tokens_match(&token, &token[..token.len() - 1]));
    }
}
