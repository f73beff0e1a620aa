//! Session records and their encrypted store.
//!
//! - [`model`]: the decrypted [`Session`] and its flow state.
//! - [`store`]: the concurrent, sealed [`SessionStore`].

pub mod model;
pub mod store;

pub use model::{FlowState, FlowType, Pin, Session};
pub use store::{SessionStore, TurnLease};

use thiserror::Error;

use crate::crypto::EncryptionError;

/// Errors from [`SessionStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session store full ({max} sessions)")]
    CapacityExceeded { max: usize },

    /// Unknown, expired, replayed or undecryptable.
    #[error("session not found")]
    NotFound,

    /// Another turn holds the session.
    #[error("session busy")]
    Busy,

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("session serialization failed: {0}")]
    Serialization(String),
}
