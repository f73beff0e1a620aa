//! # Encrypted Session Store
//!
//! Holds every live dialog, sealed under AES-256-GCM with the session id as
//! associated data. Plaintext records exist only while a handler is working
//! on them.
//!
//! ## Nonce rotation
//!
//! Each stored record carries a one-time nonce. A successful [`SessionStore::get`]
//! replaces it with a fresh one and returns the new value inside the
//! decrypted [`Session`]; the caller must echo that value on the next turn.
//! A read that presents a stale nonce is treated as a replay and destroys
//! the session outright.
//!
//! ## Expiry
//!
//! Expiry is sliding: every successful read or update pushes it out by the
//! configured idle timeout. Expired records are invisible to readers and are
//! reclaimed lazily on access or in bulk by [`SessionStore::sweep_expired`].
//!
//! ## Turns
//!
//! [`SessionStore::begin_turn`] reads a session and claims it until the
//! matching [`SessionStore::update`], or until the returned [`TurnLease`]
//! is dropped. While claimed, every other read fails with
//! [`StoreError::Busy`], so side effects of one turn never run twice. A
//! claim older than [`TURN_LEASE`] counts as abandoned.

use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;

use crate::config::{GatewayConfig, SESSION_KEY_CONTEXT, SESSION_NONCE_BYTES, TURN_LEASE};
use crate::crypto::Cipher;
use crate::format::DeviceType;
use crate::validation::{is_valid_session_id, mask_phone, normalize_phone_number};

use super::model::{FlowState, Session};
use super::StoreError;

/// One sealed record.
struct StoredSession {
    ciphertext: Vec<u8>,
    nonce: String,
    expires_at: Instant,
    /// Set while a turn holds the session.
    turn_started: Option<Instant>,
}

impl StoredSession {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn in_turn(&self, now: Instant, lease: Duration) -> bool {
        self.turn_started
            .is_some_and(|started| now.saturating_duration_since(started) < lease)
    }
}

enum ReadOutcome {
    Fresh(Session),
    Busy,
    Evict { reason: &'static str, stale_nonce: String },
}

/// Concurrent encrypted session store.
///
/// Operations on different session ids proceed in parallel; operations on
/// the same id are serialised by the map shard lock.
pub struct SessionStore {
    entries: DashMap<String, StoredSession>,
    cipher: Cipher,
    timeout: Duration,
    turn_lease: Duration,
    max_sessions: usize,
}

/// Exclusive hold on a session for one turn. Dropping it releases the
/// claim unless a newer turn has taken over.
#[must_use]
pub struct TurnLease<'a> {
    store: &'a SessionStore,
    session_id: String,
    nonce: String,
}

impl Drop for TurnLease<'_> {
    fn drop(&mut self) {
        self.store.release_turn(&self.session_id, &self.nonce);
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.entries.len())
            .field("timeout", &self.timeout)
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

impl SessionStore {
    pub fn new(cipher: Cipher, timeout: Duration, max_sessions: usize) -> Self {
        Self {
            entries: DashMap::new(),
            cipher,
            timeout,
            turn_lease: TURN_LEASE,
            max_sessions,
        }
    }

    /// Build a store whose key is derived from the configured secret.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            Cipher::derive(SESSION_KEY_CONTEXT, &config.secret),
            config.session_timeout,
            config.max_sessions,
        )
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Store a new session and return its first nonce.
    ///
    /// An existing record under the same id is replaced. When the store is
    /// full an expiry sweep runs first; if that frees nothing the call fails
    /// with [`StoreError::CapacityExceeded`].
    pub fn create(
        &self,
        session_id: &str,
        phone_number: &str,
        device: DeviceType,
        flow: FlowState,
    ) -> Result<String, StoreError> {
        if !is_valid_session_id(session_id) {
            return Err(StoreError::InvalidInput("malformed session id".into()));
        }
        let phone_number = normalize_phone_number(phone_number)
            .ok_or_else(|| StoreError::InvalidInput("malformed phone number".into()))?;

        if self.entries.len() >= self.max_sessions && !self.entries.contains_key(session_id) {
            let swept = self.sweep_expired();
            if self.entries.len() >= self.max_sessions {
                tracing::warn!(
                    max_sessions = self.max_sessions,
                    swept,
                    "session store at capacity"
                );
                return Err(StoreError::CapacityExceeded {
                    max: self.max_sessions,
                });
            }
        }

        let now = Utc::now();
        let session = Session {
            session_id: session_id.to_string(),
            nonce: generate_nonce(),
            phone_number,
            device,
            flow,
            created_at: now,
            last_activity: now,
        };
        let ciphertext = self.seal(&session)?;

        let replaced = self
            .entries
            .insert(
                session.session_id.clone(),
                StoredSession {
                    ciphertext,
                    nonce: session.nonce.clone(),
                    expires_at: Instant::now() + self.timeout,
                    turn_started: None,
                },
            )
            .is_some();

        tracing::debug!(
            session_id = %session.session_id,
            phone = %mask_phone(&session.phone_number),
            flow = %session.flow_type(),
            replaced,
            "session created"
        );
        Ok(session.nonce)
    }

    /// Open a session, rotating its nonce.
    ///
    /// With `expected_nonce` set, a mismatch destroys the session. Expired,
    /// undecryptable and unknown sessions all surface as
    /// [`StoreError::NotFound`]; a session held by a turn as
    /// [`StoreError::Busy`].
    pub fn get(&self, session_id: &str, expected_nonce: Option<&str>) -> Result<Session, StoreError> {
        self.read(session_id, expected_nonce, false)
    }

    /// Like [`get`](Self::get), and claim the session until it is updated or
    /// the lease is dropped.
    pub fn begin_turn(
        &self,
        session_id: &str,
        expected_nonce: Option<&str>,
    ) -> Result<(Session, TurnLease<'_>), StoreError> {
        let session = self.read(session_id, expected_nonce, true)?;
        let lease = TurnLease {
            store: self,
            session_id: session.session_id.clone(),
            nonce: session.nonce.clone(),
        };
        Ok((session, lease))
    }

    fn read(
        &self,
        session_id: &str,
        expected_nonce: Option<&str>,
        claim: bool,
    ) -> Result<Session, StoreError> {
        let outcome = {
            let Some(mut entry) = self.entries.get_mut(session_id) else {
                return Err(StoreError::NotFound);
            };
            let now = Instant::now();

            if entry.is_expired(now) {
                ReadOutcome::Evict {
                    reason: "expired",
                    stale_nonce: entry.nonce.clone(),
                }
            } else if entry.in_turn(now, self.turn_lease) {
                ReadOutcome::Busy
            } else if expected_nonce.is_some_and(|n| n != entry.nonce) {
                ReadOutcome::Evict {
                    reason: "nonce mismatch",
                    stale_nonce: entry.nonce.clone(),
                }
            } else {
                match self.open(session_id, &entry.ciphertext) {
                    Ok(mut session) => {
                        session.nonce = generate_nonce();
                        session.last_activity = Utc::now();
                        entry.ciphertext = self.seal(&session)?;
                        entry.nonce = session.nonce.clone();
                        entry.expires_at = now + self.timeout;
                        entry.turn_started = if claim { Some(now) } else { None };
                        ReadOutcome::Fresh(session)
                    }
                    Err(e) => {
                        tracing::error!(session_id, error = %e, "session record failed to open");
                        ReadOutcome::Evict {
                            reason: "undecryptable",
                            stale_nonce: entry.nonce.clone(),
                        }
                    }
                }
            }
        };

        match outcome {
            ReadOutcome::Fresh(session) => Ok(session),
            ReadOutcome::Busy => {
                tracing::debug!(session_id, "session held by another turn");
                Err(StoreError::Busy)
            }
            ReadOutcome::Evict { reason, stale_nonce } => {
                // Only remove the record we judged; a concurrent create may
                // have replaced it in the meantime.
                self.entries
                    .remove_if(session_id, |_, stored| stored.nonce == stale_nonce);
                if reason == "nonce mismatch" {
                    tracing::warn!(session_id, "stale nonce presented, session destroyed");
                } else {
                    tracing::debug!(session_id, reason, "session evicted on read");
                }
                Err(StoreError::NotFound)
            }
        }
    }

    /// Persist a mutated session.
    ///
    /// Returns `false` if the session is gone or another turn has rotated
    /// its nonce since `session` was read. A successful update ends the
    /// current turn.
    pub fn update(&self, session: &Session) -> bool {
        let Some(mut entry) = self.entries.get_mut(&session.session_id) else {
            return false;
        };
        let now = Instant::now();
        if entry.is_expired(now) {
            drop(entry);
            self.destroy(&session.session_id);
            return false;
        }
        if entry.nonce != session.nonce {
            tracing::debug!(session_id = %session.session_id, "update lost a race, nonce moved on");
            return false;
        }

        let mut record = session.clone();
        record.last_activity = Utc::now();
        match self.seal(&record) {
            Ok(ciphertext) => {
                entry.ciphertext = ciphertext;
                entry.expires_at = now + self.timeout;
                entry.turn_started = None;
                true
            }
            Err(e) => {
                tracing::error!(session_id = %session.session_id, error = %e, "failed to reseal session");
                false
            }
        }
    }

    /// End the turn that read `nonce`. A newer turn's claim is left alone.
    fn release_turn(&self, session_id: &str, nonce: &str) {
        if let Some(mut entry) = self.entries.get_mut(session_id) {
            if entry.nonce == nonce {
                entry.turn_started = None;
            }
        }
    }

    /// Remove a session. Returns whether anything was there.
    pub fn destroy(&self, session_id: &str) -> bool {
        self.entries.remove(session_id).is_some()
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Drop every expired record. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            if self
                .entries
                .remove_if(&id, |_, stored| stored.is_expired(now))
                .is_some()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "swept expired sessions");
        }
        removed
    }

    /// Stored records, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries.contains_key(session_id)
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    // -----------------------------------------------------------------------
    // Sealing
    // -----------------------------------------------------------------------

    fn seal(&self, session: &Session) -> Result<Vec<u8>, StoreError> {
        let plaintext =
            bincode::serialize(session).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(self.cipher.seal(&plaintext, session.session_id.as_bytes())?)
    }

    fn open(&self, session_id: &str, ciphertext: &[u8]) -> Result<Session, StoreError> {
        let plaintext = self.cipher.open(ciphertext, session_id.as_bytes())?;
        let session: Session =
            bincode::deserialize(&plaintext).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if session.session_id != session_id {
            return Err(StoreError::Serialization("session id binding mismatch".into()));
        }
        Ok(session)
    }
}

/// 128 random bits, hex-encoded.
fn generate_nonce() -> String {
    let mut bytes = [0u8; SESSION_NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
