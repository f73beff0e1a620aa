// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # USSD Gateway — Core Library
//!
//! A server-side state machine for multi-step USSD dialogs: wallet
//! registration, wallet linking and crypto/airtime purchases. Every user
//! keypress arrives as a separate stateless request carrying an opaque
//! session id; this crate keeps the conversation going between them.
//!
//! ## Architecture
//!
//! - **config** — Protocol constants and the runtime [`GatewayConfig`].
//! - **crypto** — AES-256-GCM sealing, BLAKE3 key derivation, Ed25519 wallet signatures.
//! - **validation** — Session ids, phone numbers, PINs, amounts.
//! - **format** — Fits every reply into the handset's transcript budget.
//! - **ratelimit** — Per-key windows for each operation class.
//! - **session** — Encrypted, nonce-rotating session store.
//! - **dialog** — Registration and purchase flows as stage tables.
//! - **linking** — Out-of-band wallet-link tokens.
//! - **ledger** — The collaborator trait plus an in-memory implementation.
//! - **gateway** — The request-level facade tying it all together.
//!
//! ## Guarantees
//!
//! 1. Session state is only ever stored encrypted and bound to its id.
//! 2. A stale nonce kills the session; replays never apply twice.
//! 3. No reply exceeds the device's message budget.
//! 4. A failed ledger call ends the dialog. Nothing financial is retried.

pub mod config;
pub mod crypto;
pub mod dialog;
pub mod error;
pub mod format;
pub mod gateway;
pub mod ledger;
pub mod linking;
pub mod ratelimit;
pub mod session;
pub mod validation;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{ContinueRequest, FlowRequest, Gateway, GatewayReply, StartRequest, SweepReport};
pub use ledger::{InMemoryLedger, Ledger, LedgerError};
