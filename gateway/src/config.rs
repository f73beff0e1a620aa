//! # Gateway Configuration & Constants
//!
//! Every magic number the gateway relies on lives here: session lifetimes,
//! PIN rules, purchase bounds, message budgets, and rate-limit windows.
//! [`GatewayConfig`] bundles the values that operators are allowed to tune
//! at runtime; everything else is a protocol constant.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Gateway protocol version reported by `/status`.
pub const GATEWAY_VERSION: &str = "0.1.0";

/// Context string for deriving the session encryption key. Changing it
/// invalidates every live session, so bump the suffix deliberately.
pub const SESSION_KEY_CONTEXT: &str = "ussd-gateway 2026-01 session store key";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes.
pub const AES_NONCE_LENGTH: usize = 12;

/// Random bytes behind each session nonce (hex-encoded on the wire).
pub const SESSION_NONCE_BYTES: usize = 16;

/// Ed25519 public key length. Wallet addresses decode to this.
pub const WALLET_KEY_LENGTH: usize = 32;

/// Ed25519 signature length.
pub const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Idle timeout. Every successful read pushes expiry out by this much.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(180);

/// How long one `continue` turn may hold a session exclusively before
/// the claim is considered abandoned.
pub const TURN_LEASE: Duration = Duration::from_secs(60);

/// Upper bound on concurrently stored sessions.
pub const MAX_SESSIONS: usize = 10_000;

/// How often the maintenance task sweeps expired sessions and links.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum length of a caller-supplied session id.
pub const MIN_SESSION_ID_LENGTH: usize = 8;

/// Maximum length of a caller-supplied session id.
pub const MAX_SESSION_ID_LENGTH: usize = 128;

/// User input beyond this many characters is cut before processing.
pub const MAX_INPUT_LENGTH: usize = 160;

// ---------------------------------------------------------------------------
// Dialog Rules
// ---------------------------------------------------------------------------

/// Shortest accepted PIN.
pub const PIN_MIN_LENGTH: usize = 4;

/// Longest accepted PIN.
pub const PIN_MAX_LENGTH: usize = 6;

/// Malformed PIN entries tolerated on a PIN-setup or PIN-entry stage.
pub const MAX_PIN_FORMAT_ATTEMPTS: u8 = 3;

/// Mismatched confirmations tolerated on a PIN-confirm stage.
pub const MAX_PIN_CONFIRM_ATTEMPTS: u8 = 2;

/// Unrecognised menu choices tolerated before the dialog is cancelled.
pub const MAX_MENU_ATTEMPTS: u8 = 3;

/// Smallest purchase amount, in local currency units.
pub const MIN_PURCHASE_AMOUNT: u64 = 100;

/// Largest purchase amount, in local currency units.
pub const MAX_PURCHASE_AMOUNT: u64 = 500_000;

/// Time a wallet-linking token stays redeemable.
pub const LINK_TTL: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Message Budgets
// ---------------------------------------------------------------------------

/// Transcript budget for smartphone-class handsets.
pub const SMARTPHONE_MAX_MESSAGE_LENGTH: usize = 182;

/// Transcript budget for feature phones (classic USSD page).
pub const FEATURE_PHONE_MAX_MESSAGE_LENGTH: usize = 160;

/// Appended to truncated messages.
pub const ELLIPSIS: &str = "...";

// ---------------------------------------------------------------------------
// Rate Limits
// ---------------------------------------------------------------------------

/// Window and threshold for one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Length of the fixed-origin window.
    pub window: Duration,
    /// Calls (or failures) allowed inside one window.
    pub max_hits: u32,
}

impl RateLimitRule {
    pub const fn new(max_hits: u32, window: Duration) -> Self {
        Self { window, max_hits }
    }
}

/// General API traffic, keyed by client IP.
pub const GENERAL_RATE_LIMIT: RateLimitRule = RateLimitRule::new(100, Duration::from_secs(15 * 60));

/// Session starts, keyed by phone number (or IP when no phone is known).
pub const SESSION_START_RATE_LIMIT: RateLimitRule = RateLimitRule::new(15, Duration::from_secs(5 * 60));

/// Failed PIN entries, keyed by phone number.
pub const PIN_RATE_LIMIT: RateLimitRule = RateLimitRule::new(5, Duration::from_secs(60 * 60));

/// Registrations, keyed by phone number.
pub const REGISTRATION_RATE_LIMIT: RateLimitRule =
    RateLimitRule::new(3, Duration::from_secs(24 * 60 * 60));

/// Transactions, keyed by phone number.
pub const TRANSACTION_RATE_LIMIT: RateLimitRule = RateLimitRule::new(5, Duration::from_secs(10 * 60));

/// Per-class rate-limit rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub general: RateLimitRule,
    pub session_start: RateLimitRule,
    pub pin: RateLimitRule,
    pub registration: RateLimitRule,
    pub transaction: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: GENERAL_RATE_LIMIT,
            session_start: SESSION_START_RATE_LIMIT,
            pin: PIN_RATE_LIMIT,
            registration: REGISTRATION_RATE_LIMIT,
            transaction: TRANSACTION_RATE_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Operator-tunable settings for one gateway instance.
///
/// `secret` feeds the session-key derivation. It is never logged and
/// `Debug` redacts it.
#[derive(Clone)]
pub struct GatewayConfig {
    pub secret: Vec<u8>,
    pub session_timeout: Duration,
    pub max_sessions: usize,
    pub sweep_interval: Duration,
    pub link_ttl: Duration,
    pub min_amount: u64,
    pub max_amount: u64,
    pub max_input_length: usize,
    /// Reject wallet callbacks whose signature is missing or invalid.
    pub require_link_signature: bool,
    pub rate_limits: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            secret: Vec::new(),
            session_timeout: SESSION_TIMEOUT,
            max_sessions: MAX_SESSIONS,
            sweep_interval: SWEEP_INTERVAL,
            link_ttl: LINK_TTL,
            min_amount: MIN_PURCHASE_AMOUNT,
            max_amount: MAX_PURCHASE_AMOUNT,
            max_input_length: MAX_INPUT_LENGTH,
            require_link_signature: false,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Default configuration keyed by the given secret.
    pub fn with_secret(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("secret", &"<redacted>")
            .field("session_timeout", &self.session_timeout)
            .field("max_sessions", &self.max_sessions)
            .field("sweep_interval", &self.sweep_interval)
            .field("link_ttl", &self.link_ttl)
            .field("min_amount", &self.min_amount)
            .field("max_amount", &self.max_amount)
            .field("max_input_length", &self.max_input_length)
            .field("require_link_signature", &self.require_link_signature)
            .field("rate_limits", &self.rate_limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_bounds_sanity() {
        assert!(PIN_MIN_LENGTH <= PIN_MAX_LENGTH);
        assert!(MAX_PIN_CONFIRM_ATTEMPTS <= MAX_PIN_FORMAT_ATTEMPTS);
    }

    #[test]
    fn test_amount_bounds_sanity() {
        assert!(MIN_PURCHASE_AMOUNT < MAX_PURCHASE_AMOUNT);
        let config = GatewayConfig::default();
        assert_eq!(config.min_amount, 100);
    }

    #[test]
    fn test_message_budgets() {
        // Feature phones get the classic USSD page; smartphones a bit more.
        assert_eq!(FEATURE_PHONE_MAX_MESSAGE_LENGTH, 160);
        assert!(SMARTPHONE_MAX_MESSAGE_LENGTH > FEATURE_PHONE_MAX_MESSAGE_LENGTH);
        assert!(ELLIPSIS.len() < FEATURE_PHONE_MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn test_sweep_runs_before_sessions_expire_twice() {
        assert!(SWEEP_INTERVAL <= SESSION_TIMEOUT);
        assert!(LINK_TTL > SESSION_TIMEOUT);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = GatewayConfig::with_secret(b"hunter2".to_vec());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_crypto_parameter_sizes() {
        assert_eq!(AES_KEY_LENGTH, 32);
        assert_eq!(AES_NONCE_LENGTH, 12);
        assert_eq!(WALLET_KEY_LENGTH, 32);
        assert_eq!(SIGNATURE_LENGTH, 64);
    }
}
