//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around audited implementations:
//!
//! - **AES-256-GCM** seals session records at rest.
//! - **BLAKE3** derives the sealing key from the operator secret.
//! - **SHA-256** digests PINs inside the in-memory ledger.
//! - **Ed25519** verifies wallet-linking signatures.

pub mod encryption;
pub mod hash;
pub mod signatures;

pub use encryption::{Cipher, EncryptionError};
pub use hash::{blake3_hash, derive_key, sha256};
pub use signatures::{is_valid_wallet_address, verify_wallet_signature, SignatureError};
