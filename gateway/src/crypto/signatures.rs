//! # Wallet Signatures
//!
//! Ed25519 verification for wallet-linking callbacks. A wallet app proves
//! control of an address by signing a message with the matching key; the
//! address itself is the base58-encoded 32-byte public key.
//!
//! Signatures are accepted base58-encoded (what mobile wallets emit) or
//! hex-encoded. Verification is strict (`verify_strict`), rejecting
//! small-order keys and malleable signatures.

use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

use crate::config::{SIGNATURE_LENGTH, WALLET_KEY_LENGTH};

/// Errors during wallet signature checks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature encoding: expected {SIGNATURE_LENGTH} bytes in base58 or hex")]
    InvalidSignatureEncoding,

    #[error("invalid wallet address")]
    InvalidAddress,
}

/// Decode a base58 wallet address into an Ed25519 verifying key.
pub fn decode_wallet_address(address: &str) -> Result<VerifyingKey, SignatureError> {
    let bytes = bs58::decode(address.trim())
        .into_vec()
        .map_err(|_| SignatureError::InvalidAddress)?;
    let bytes: [u8; WALLET_KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SignatureError::InvalidAddress)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| SignatureError::InvalidAddress)
}

/// Returns `true` if `address` decodes to a usable Ed25519 public key.
pub fn is_valid_wallet_address(address: &str) -> bool {
    decode_wallet_address(address).is_ok()
}

/// Decode a 64-byte signature from base58, falling back to hex.
pub fn decode_signature(encoded: &str) -> Result<Signature, SignatureError> {
    let encoded = encoded.trim();
    let bytes = bs58::decode(encoded)
        .into_vec()
        .ok()
        .filter(|b| b.len() == SIGNATURE_LENGTH)
        .or_else(|| hex::decode(encoded).ok())
        .ok_or(SignatureError::InvalidSignatureEncoding)?;
    let bytes: [u8; SIGNATURE_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SignatureError::InvalidSignatureEncoding)?;
    Ok(Signature::from_bytes(&bytes))
}

/// Verify that `signature` over `message` was produced by the key behind
/// `address`.
pub fn verify_wallet_signature(
    address: &str,
    message: &str,
    signature: &str,
) -> Result<(), SignatureError> {
    let key = decode_wallet_address(address)?;
    let signature = decode_signature(signature)?;
    key.verify_strict(message.as_bytes(), &signature)
        .map_err(|_| SignatureError::VerificationFailed)
}
