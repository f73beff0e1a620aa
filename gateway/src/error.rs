//! Error taxonomy for gateway operations.
//!
//! Every fallible public operation returns a [`GatewayError`]. The variants
//! map one-to-one onto what the HTTP layer tells the client; none of them
//! carries internal detail beyond a human-readable reason.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::ratelimit::{OperationClass, RateLimited};
use crate::session::StoreError;

/// Errors surfaced by [`crate::Gateway`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed input: phone, PIN, amount, session id, wallet address.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Too many attempts inside the class window.
    #[error("too many {class} requests, retry after {retry_after_secs}s")]
    RateLimited {
        class: OperationClass,
        retry_after_secs: u64,
    },

    /// Expired, tampered, replayed, or never existed. Deliberately
    /// indistinguishable.
    #[error("session not found")]
    SessionNotFound,

    /// The ledger reported failure or could not be reached.
    #[error("ledger error: {0}")]
    Collaborator(String),

    /// The session store is full even after a sweep.
    #[error("session capacity exceeded, try again shortly")]
    CapacityExceeded,

    /// Unknown or expired wallet-linking token.
    #[error("linking connection not found")]
    ConnectionNotFound,

    /// A concurrent operation on the same resource won the race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Serialization or encryption failure inside the gateway.
    #[error("internal error")]
    Internal(String),
}

impl GatewayError {
    /// Retry-after hint for rate-limit errors.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<RateLimited> for GatewayError {
    fn from(e: RateLimited) -> Self {
        Self::RateLimited {
            class: e.class,
            retry_after_secs: e.retry_after_secs,
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidInput(reason) => Self::Validation(reason),
            StoreError::CapacityExceeded { .. } => Self::CapacityExceeded,
            StoreError::NotFound => Self::SessionNotFound,
            StoreError::Busy => Self::Conflict("session is busy with another request".into()),
            StoreError::Encryption(e) => Self::Internal(e.to_string()),
            StoreError::Serialization(reason) => Self::Internal(reason),
        }
    }
}

impl From<LedgerError> for GatewayError {
    fn from(e: LedgerError) -> Self {
        Self::Collaborator(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_conversion_keeps_retry_after() {
        let err: GatewayError = RateLimited {
            class: OperationClass::Pin,
            retry_after_secs: 42,
        }
        .into();
        assert_eq!(err.retry_after_secs(), Some(42));
        assert_eq!(err.to_string(), "too many pin requests, retry after 42s");
    }

    #[test]
    fn test_store_not_found_is_session_not_found() {
        let err: GatewayError = StoreError::NotFound.into();
        assert!(matches!(err, GatewayError::SessionNotFound));
    }

    #[test]
    fn test_busy_session_is_conflict() {
        let err: GatewayError = StoreError::Busy.into();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[test]
    fn test_internal_hides_detail() {
        let err = GatewayError::Internal("bincode: unexpected eof".into());
        assert_eq!(err.to_string(), "internal error");
    }
}
