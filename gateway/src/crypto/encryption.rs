//! # AES-256-GCM Session Sealing
//!
//! Authenticated encryption for session records at rest. Every record is
//! sealed under a single process-wide key and bound to its session id via
//! associated data, so a ciphertext copied under a different id fails to
//! open exactly like a corrupted one.
//!
//! ## Nonce management
//!
//! Random 96-bit nonces from the OS CSPRNG, one per seal. A record is
//! re-sealed on every read, so nonces are never reused with the same key
//! for any realistic session volume (birthday bound ~2^48 seals).
//!
//! ## Wire format
//!
//! [`Cipher::seal`] returns `nonce || ciphertext || tag` as a single
//! `Vec<u8>`. [`Cipher::open`] expects the same layout.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

use super::hash::derive_key;

/// Errors that can occur during sealing/opening.
///
/// Kept vague on purpose: "wrong key", "wrong session id" and "flipped bit"
/// all collapse into [`EncryptionError::DecryptFailed`].
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key, wrong binding or corrupted ciphertext")]
    DecryptFailed,

    #[error("ciphertext too short: must be at least {AES_NONCE_LENGTH} bytes")]
    CiphertextTooShort,
}

/// A keyed AES-256-GCM instance.
///
/// The key is derived once from the operator secret and never leaves this
/// struct. `Debug` does not print it.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; AES_KEY_LENGTH],
}

impl Cipher {
    /// Wrap raw key bytes.
    pub fn new(key: [u8; AES_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Derive the key from an operator secret under a fixed context string.
    pub fn derive(context: &str, secret: &[u8]) -> Self {
        Self::new(derive_key(context, secret))
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    ///
    /// Returns `nonce || ciphertext`. The AAD is not stored; the caller must
    /// present the same bytes to [`open`](Self::open).
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| EncryptionError::EncryptFailed)?;

        let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt data produced by [`seal`](Self::seal) with the same AAD.
    pub fn open(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < AES_NONCE_LENGTH {
            return Err(EncryptionError::CiphertextTooShort);
        }

        let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| EncryptionError::DecryptFailed)?;
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| EncryptionError::DecryptFailed)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher(<redacted>)")
    }
}
