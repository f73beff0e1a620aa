//! # Wallet Linking
//!
//! Linking an existing wallet happens out of band. The registration dialog
//! creates a pending connection and shows its id to the user; the wallet app
//! later calls back with the wallet address (and optionally a signature over
//! a challenge message). The callback completes the link in the ledger.
//!
//! Connections live for the configured TTL. Completing one is idempotent:
//! once connected, further callbacks return the recorded address without
//! touching the ledger. Concurrent callbacks for the same connection are
//! serialised by an in-flight claim so the ledger sees at most one link call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::crypto::{is_valid_wallet_address, verify_wallet_signature};
use crate::error::GatewayError;
use crate::ledger::{Ledger, LinkOptions};
use crate::session::Pin;
use crate::validation::mask_phone;

/// Where a connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Pending,
    Connected,
}

#[derive(Debug, Clone)]
struct LinkingConnection {
    session_id: String,
    phone_number: String,
    pin: Pin,
    status: LinkStatus,
    wallet_address: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: Instant,
    in_flight: bool,
}

impl LinkingConnection {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Public view of a connection, safe to return over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionView {
    pub connection_id: String,
    pub session_id: String,
    pub status: LinkStatus,
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Seconds until the connection expires.
    pub expires_in_secs: u64,
}

/// Result of a wallet callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkResult {
    pub connection_id: String,
    pub wallet_address: String,
    pub status: LinkStatus,
    /// `true` when the connection had already been completed earlier.
    pub already_linked: bool,
    /// `None` when no signature was presented.
    pub signature_verified: Option<bool>,
}

enum Claim {
    Proceed { phone_number: String, pin: Pin },
    AlreadyLinked(String),
    Busy,
    Expired,
}

/// Tracks pending wallet links and completes them against the ledger.
pub struct LinkingCoordinator {
    connections: DashMap<String, LinkingConnection>,
    ledger: Arc<dyn Ledger>,
    ttl: Duration,
    require_signature: bool,
}

impl std::fmt::Debug for LinkingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkingCoordinator")
            .field("connections", &self.connections.len())
            .field("ttl", &self.ttl)
            .field("require_signature", &self.require_signature)
            .finish()
    }
}

impl LinkingCoordinator {
    pub fn new(ledger: Arc<dyn Ledger>, ttl: Duration, require_signature: bool) -> Self {
        Self {
            connections: DashMap::new(),
            ledger,
            ttl,
            require_signature,
        }
    }

    /// Open a pending connection and return its id.
    pub fn create(&self, session_id: &str, phone_number: &str, pin: Pin) -> String {
        let connection_id = uuid::Uuid::new_v4().simple().to_string();
        self.connections.insert(
            connection_id.clone(),
            LinkingConnection {
                session_id: session_id.to_string(),
                phone_number: phone_number.to_string(),
                pin,
                status: LinkStatus::Pending,
                wallet_address: None,
                created_at: Utc::now(),
                expires_at: Instant::now() + self.ttl,
                in_flight: false,
            },
        );
        tracing::info!(
            connection_id = %connection_id,
            session_id,
            phone = %mask_phone(phone_number),
            "wallet link pending"
        );
        connection_id
    }

    /// Complete a connection with the wallet's address.
    ///
    /// When both `signature` and `message` are present the signature is
    /// checked against the address. A bad signature is only fatal when the
    /// coordinator was built with `require_signature`.
    pub async fn complete(
        &self,
        connection_id: &str,
        wallet_address: &str,
        signature: Option<&str>,
        message: Option<&str>,
    ) -> Result<LinkResult, GatewayError> {
        let wallet_address = wallet_address.trim();
        if !is_valid_wallet_address(wallet_address) {
            return Err(GatewayError::Validation("malformed wallet address".into()));
        }

        let claim = {
            let Some(mut conn) = self.connections.get_mut(connection_id) else {
                return Err(GatewayError::ConnectionNotFound);
            };
            if conn.is_expired(Instant::now()) {
                Claim::Expired
            } else if conn.status == LinkStatus::Connected {
                Claim::AlreadyLinked(conn.wallet_address.clone().unwrap_or_default())
            } else if conn.in_flight {
                Claim::Busy
            } else {
                conn.in_flight = true;
                Claim::Proceed {
                    phone_number: conn.phone_number.clone(),
                    pin: conn.pin.clone(),
                }
            }
        };

        let (phone_number, pin) = match claim {
            Claim::Proceed { phone_number, pin } => (phone_number, pin),
            Claim::AlreadyLinked(address) => {
                tracing::debug!(connection_id, "wallet callback replayed on linked connection");
                return Ok(LinkResult {
                    connection_id: connection_id.to_string(),
                    wallet_address: address,
                    status: LinkStatus::Connected,
                    already_linked: true,
                    signature_verified: None,
                });
            }
            Claim::Busy => {
                return Err(GatewayError::Conflict("link already in progress".into()));
            }
            Claim::Expired => {
                self.connections.remove(connection_id);
                return Err(GatewayError::ConnectionNotFound);
            }
        };
        // Released on every exit, including a dropped future.
        let _claim = InFlight {
            connections: &self.connections,
            connection_id,
        };

        let signature_verified = match (signature, message) {
            (Some(signature), Some(message)) => {
                match verify_wallet_signature(wallet_address, message, signature) {
                    Ok(()) => Some(true),
                    Err(e) => {
                        tracing::warn!(connection_id, error = %e, "wallet signature rejected");
                        Some(false)
                    }
                }
            }
            _ => None,
        };
        if self.require_signature && signature_verified != Some(true) {
            return Err(GatewayError::Validation(
                "valid wallet signature required".into(),
            ));
        }

        let options = LinkOptions {
            signature: signature.map(str::to_string),
            message: message.map(str::to_string),
        };
        if let Err(e) = self
            .ledger
            .link_wallet(&phone_number, pin.as_str(), wallet_address, &options)
            .await
        {
            tracing::warn!(connection_id, error = %e, "ledger refused wallet link");
            return Err(e.into());
        }

        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.status = LinkStatus::Connected;
            conn.wallet_address = Some(wallet_address.to_string());
        }
        tracing::info!(
            connection_id,
            phone = %mask_phone(&phone_number),
            "wallet linked"
        );

        Ok(LinkResult {
            connection_id: connection_id.to_string(),
            wallet_address: wallet_address.to_string(),
            status: LinkStatus::Connected,
            already_linked: false,
            signature_verified,
        })
    }

    /// Look up a live connection.
    pub fn status(&self, connection_id: &str) -> Option<ConnectionView> {
        let conn = self.connections.get(connection_id)?;
        let now = Instant::now();
        if conn.is_expired(now) {
            return None;
        }
        Some(ConnectionView {
            connection_id: connection_id.to_string(),
            session_id: conn.session_id.clone(),
            status: conn.status,
            wallet_address: conn.wallet_address.clone(),
            created_at: conn.created_at,
            expires_in_secs: conn.expires_at.saturating_duration_since(now).as_secs(),
        })
    }

    /// Drop expired connections, pending, connected or in flight. Returns
    /// how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.connections.len();
        self.connections.retain(|_, conn| !conn.is_expired(now));
        before.saturating_sub(self.connections.len())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&self) {
        self.connections.clear();
    }
}

/// Claim on a connection taken by [`LinkingCoordinator::complete`].
struct InFlight<'a> {
    connections: &'a DashMap<String, LinkingConnection>,
    connection_id: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.connections.get_mut(self.connection_id) {
            conn.in_flight = false;
        }
    }
}
