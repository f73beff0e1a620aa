//! # Ledger Collaborator
//!
//! The gateway never moves value itself. User registration, PIN checks,
//! transactions, rate quotes and wallet links all go through a [`Ledger`]
//! implementation supplied at construction time.
//!
//! [`InMemoryLedger`] is a self-contained implementation used by the node's
//! development mode and by the test suite. It stores PIN digests only, counts
//! calls per operation and can be told to fail any operation on demand.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{blake3_hash, sha256};
use crate::dialog::purchase::PurchaseKind;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors a ledger may report. The display text is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("user not found")]
    UserNotFound,

    #[error("user already registered")]
    AlreadyRegistered,

    #[error("invalid PIN")]
    InvalidPin,

    #[error("{0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Ledger-assigned wallet identifier.
    pub identifier: String,
}

/// Everything the ledger needs to execute a purchase.
#[derive(Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub phone_number: String,
    pub pin: String,
    pub amount: u64,
    pub kind: PurchaseKind,
    /// Beneficiary for send-to-other purchases.
    pub recipient: Option<String>,
}

impl std::fmt::Debug for TransactionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRequest")
            .field("phone_number", &self.phone_number)
            .field("pin", &"****")
            .field("amount", &self.amount)
            .field("kind", &self.kind)
            .field("recipient", &self.recipient)
            .finish()
    }
}

/// Proof that a transaction went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Ledger transaction signature or reference.
    pub signature: String,
}

/// Price quote: local currency units per one unit of `asset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub rate: f64,
    pub asset: String,
    /// Venue the quote came from.
    pub source: String,
}

/// Optional proof material forwarded with a wallet link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOptions {
    pub signature: Option<String>,
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The ledger collaborator.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether `phone_number` already has a wallet.
    async fn user_exists(&self, phone_number: &str) -> Result<bool, LedgerError>;

    /// Create a new custodial wallet protected by `pin`.
    async fn register_user(&self, phone_number: &str, pin: &str) -> Result<Registration, LedgerError>;

    /// Execute a purchase.
    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Best available rate for `amount` local currency units.
    async fn best_rate(&self, amount: u64) -> Result<ExchangeRate, LedgerError>;

    /// Attach an external wallet to `phone_number`.
    async fn link_wallet(
        &self,
        phone_number: &str,
        pin: &str,
        wallet_address: &str,
        options: &LinkOptions,
    ) -> Result<(), LedgerError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Operations of [`InMemoryLedger`], for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    UserExists,
    RegisterUser,
    CreateTransaction,
    BestRate,
    LinkWallet,
}

#[derive(Debug, Clone)]
struct UserRecord {
    identifier: String,
    pin_digest: [u8; 32],
    linked_wallets: Vec<String>,
}

/// Ledger kept entirely in process memory.
#[derive(Debug)]
pub struct InMemoryLedger {
    users: DashMap<String, UserRecord>,
    rate: RwLock<ExchangeRate>,
    calls: DashMap<LedgerOp, usize>,
    failures: DashMap<LedgerOp, LedgerError>,
    sequence: AtomicU64,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(ExchangeRate {
            rate: 1_550.0,
            asset: "USDC".into(),
            source: "in-memory".into(),
        })
    }
}

impl InMemoryLedger {
    pub fn new(rate: ExchangeRate) -> Self {
        Self {
            users: DashMap::new(),
            rate: RwLock::new(rate),
            calls: DashMap::new(),
            failures: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Pre-register a user.
    pub fn with_user(self, phone_number: &str, pin: &str) -> Self {
        self.insert_user(phone_number, pin);
        self
    }

    /// Make `op` fail with `error` until [`clear_failure`](Self::clear_failure).
    pub fn fail(&self, op: LedgerOp, error: LedgerError) {
        self.failures.insert(op, error);
    }

    pub fn clear_failure(&self, op: LedgerOp) {
        self.failures.remove(&op);
    }

    /// How many times `op` has been invoked.
    pub fn calls(&self, op: LedgerOp) -> usize {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    pub fn set_rate(&self, rate: ExchangeRate) {
        *self.rate.write() = rate;
    }

    pub fn is_registered(&self, phone_number: &str) -> bool {
        self.users.contains_key(phone_number)
    }

    /// Wallet addresses linked to `phone_number`.
    pub fn linked_wallets(&self, phone_number: &str) -> Vec<String> {
        self.users
            .get(phone_number)
            .map(|u| u.linked_wallets.clone())
            .unwrap_or_default()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn enter(&self, op: LedgerOp) -> Result<(), LedgerError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn insert_user(&self, phone_number: &str, pin: &str) -> String {
        let identifier = bs58::encode(&blake3_hash(phone_number.as_bytes())[..20]).into_string();
        self.users.insert(
            phone_number.to_string(),
            UserRecord {
                identifier: identifier.clone(),
                pin_digest: pin_digest(phone_number, pin),
                linked_wallets: Vec::new(),
            },
        );
        identifier
    }
}

/// PINs are salted with the phone number so equal PINs do not collide.
fn pin_digest(phone_number: &str, pin: &str) -> [u8; 32] {
    sha256(format!("{}:{}", phone_number, pin).as_bytes())
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn user_exists(&self, phone_number: &str) -> Result<bool, LedgerError> {
        self.enter(LedgerOp::UserExists)?;
        Ok(self.users.contains_key(phone_number))
    }

    async fn register_user(&self, phone_number: &str, pin: &str) -> Result<Registration, LedgerError> {
        self.enter(LedgerOp::RegisterUser)?;
        if self.users.contains_key(phone_number) {
            return Err(LedgerError::AlreadyRegistered);
        }
        let identifier = self.insert_user(phone_number, pin);
        Ok(Registration { identifier })
    }

    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.enter(LedgerOp::CreateTransaction)?;
        let user = self
            .users
            .get(&request.phone_number)
            .ok_or(LedgerError::UserNotFound)?;
        if user.pin_digest != pin_digest(&request.phone_number, &request.pin) {
            return Err(LedgerError::InvalidPin);
        }

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let digest = blake3_hash(
            format!(
                "{}:{}:{}:{:?}:{}",
                user.identifier,
                request.amount,
                request.recipient.as_deref().unwrap_or("-"),
                request.kind,
                seq
            )
            .as_bytes(),
        );
        Ok(TransactionReceipt {
            signature: bs58::encode(digest).into_string(),
        })
    }

    async fn best_rate(&self, _amount: u64) -> Result<ExchangeRate, LedgerError> {
        self.enter(LedgerOp::BestRate)?;
        Ok(self.rate.read().clone())
    }

    async fn link_wallet(
        &self,
        phone_number: &str,
        pin: &str,
        wallet_address: &str,
        _options: &LinkOptions,
    ) -> Result<(), LedgerError> {
        self.enter(LedgerOp::LinkWallet)?;
        if !self.users.contains_key(phone_number) {
            self.insert_user(phone_number, pin);
        }
        if let Some(mut user) = self.users.get_mut(phone_number) {
            if !user.linked_wallets.iter().any(|w| w == wallet_address) {
                user.linked_wallets.push(wallet_address.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHONE: &str = "08031234567";

    fn purchase(pin: &str) -> TransactionRequest {
        TransactionRequest {
            phone_number: PHONE.into(),
            pin: pin.into(),
            amount: 1_000,
            kind: PurchaseKind::WalletLoad,
            recipient: None,
        }
    }

    #[tokio::test]
    async fn test_register_then_exists() {
        let ledger = InMemoryLedger::default();
        assert!(!ledger.user_exists(PHONE).await.unwrap());
        let reg = ledger.register_user(PHONE, "1234").await.unwrap();
        assert!(!reg.identifier.is_empty());
        assert!(ledger.user_exists(PHONE).await.unwrap());
        assert_eq!(
            ledger.register_user(PHONE, "1234").await,
            Err(LedgerError::AlreadyRegistered)
        );
        assert_eq!(ledger.calls(LedgerOp::RegisterUser), 2);
    }

    #[tokio::test]
    async fn test_transaction_checks_pin() {
        let ledger = InMemoryLedger::default().with_user(PHONE, "1234");
        let receipt = ledger.create_transaction(&purchase("1234")).await.unwrap();
        assert!(!receipt.signature.is_empty());
        assert_eq!(
            ledger.create_transaction(&purchase("9999")).await,
            Err(LedgerError::InvalidPin)
        );
    }

    #[tokio::test]
    async fn test_transaction_signatures_are_unique() {
        let ledger = InMemoryLedger::default().with_user(PHONE, "1234");
        let a = ledger.create_transaction(&purchase("1234")).await.unwrap();
        let b = ledger.create_transaction(&purchase("1234")).await.unwrap();
        assert_ne!(a.signature, b.signature);
    }

    #[tokio::test]
    async fn test_unknown_user_transaction() {
        let ledger = InMemoryLedger::default();
        assert_eq!(
            ledger.create_transaction(&purchase("1234")).await,
            Err(LedgerError::UserNotFound)
        );
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let ledger = InMemoryLedger::default();
        ledger.fail(LedgerOp::BestRate, LedgerError::Unavailable("timeout".into()));
        assert!(ledger.best_rate(1_000).await.is_err());
        ledger.clear_failure(LedgerOp::BestRate);
        let rate = ledger.best_rate(1_000).await.unwrap();
        assert_eq!(rate.asset, "USDC");
        assert_eq!(ledger.calls(LedgerOp::BestRate), 2);
    }

    #[tokio::test]
    async fn test_link_wallet_registers_and_dedupes() {
        let ledger = InMemoryLedger::default();
        let opts = LinkOptions::default();
        ledger.link_wallet(PHONE, "1234", "WalletAddr", &opts).await.unwrap();
        ledger.link_wallet(PHONE, "1234", "WalletAddr", &opts).await.unwrap();
        assert!(ledger.is_registered(PHONE));
        assert_eq!(ledger.linked_wallets(PHONE), vec!["WalletAddr".to_string()]);
    }

    #[test]
    fn test_request_debug_hides_pin() {
        let rendered = format!("{:?}", purchase("4321"));
        assert!(!rendered.contains("4321"));
    }
}
