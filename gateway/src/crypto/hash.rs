//! # Hashing Utilities
//!
//! Two hash functions, two jobs:
//!
//! - **BLAKE3** in `derive_key` mode turns the operator secret into the
//!   session encryption key, and hashes ledger identifiers.
//! - **SHA-256** digests PINs held by the in-memory ledger, since that is
//!   what external ledgers expect to compare against.

use sha2::{Digest, Sha256};

/// Derive a 32-byte key from `material` under a context string.
///
/// Uses BLAKE3's `derive_key` mode. Two different contexts never produce
/// related keys, even for identical material.
pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(material);
    *hasher.finalize().as_bytes()
}

/// BLAKE3 hash of the input.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// SHA-256 digest as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc"), FIPS 180-2 appendix B.1.
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_derive_key_context_separation() {
        let a = derive_key("context one", b"same secret");
        let b = derive_key("context two", b"same secret");
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_deterministic() {
        assert_eq!(derive_key("ctx", b"secret"), derive_key("ctx", b"secret"));
    }

    #[test]
    fn test_blake3_known_vector() {
        // BLAKE3 of the empty input.
        assert_eq!(
            hex::encode(blake3_hash(b"")),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }
}
