//! Shared-credential check for administrative operations.
//!
//! Authentication and session handling belong to the HTTP adapter; the
//! store only verifies the single shared admin token before mutating
//! anything on an administrative path.

use subtle::ConstantTimeEq;

use crate::error::StoreError;

/// Constant-time comparison of a presented token against the configured
/// one. The comparison must not leak how close a guess was.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    // `ct_eq` on unequal-length slices returns false without comparing
    // contents; the length itself is not secret.
    bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}

/// Gate an administrative operation. Callers run this before touching
/// the store.
pub fn require_admin(expected: &str, presented: &str) -> Result<(), StoreError> {
    if token_matches(expected, presented) {
        Ok(())
    } else {
        Err(StoreError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_tokens_pass() {
        assert!(token_matches("s3cret-admin-token", "s3cret-admin-token"));
        assert!(require_admin("abc", "abc").is_ok());
    }

    #[test]
    fn near_misses_fail() {
        assert!(!token_matches("s3cret-admin-token", "s3cret-admin-tokeN"));
        assert!(!token_matches("s3cret-admin-token", "s3cret"));
        assert!(!token_matches("s3cret-admin-token", ""));
    }

    #[test]
    fn mismatch_is_unauthorized() {
        assert!(matches!(require_admin("abc", "abd"), Err(StoreError::Unauthorized)));
    }
}
