//! Deterministic content hashing for prompt fingerprints and attempt identity.
//!
//! sha256 hex digests keep identities stable across platforms and process
//! restarts; the attempt identity doubles as the idempotency key for resume.

use sha2::{Digest, Sha256};

/// Hex sha256 digest of a text.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable attempt identity: sha256 over the pipe-joined parts.
///
/// Callers must pass the parts in a fixed order; identical inputs always
/// yield the identical identity.
pub fn attempt_identity(parts: &[String]) -> String {
    fingerprint(&parts.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint("hello"), fingerprint("hello"));
        assert_ne!(fingerprint("hello"), fingerprint("hello "));
    }

    #[test]
    fn fingerprint_matches_known_sha256() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn attempt_identity_depends_on_part_order() {
        let a = attempt_identity(&["x".into(), "y".into()]);
        let b = attempt_identity(&["y".into(), "x".into()]);
        assert_ne!(a, b);
        assert_eq!(a, attempt_identity(&["x".into(), "y".into()]));
    }

    #[test]
    fn attempt_identity_joins_with_pipe() {
        assert_eq!(
            attempt_identity(&["x".into(), "y".into()]),
            fingerprint("x|y")
        );
    }
}
