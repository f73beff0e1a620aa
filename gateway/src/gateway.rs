//! # Gateway
//!
//! The request-level facade: `start`, `continue`, `end` and the wallet
//! callback. Each call validates its input, consults the rate limiter, loads
//! or creates the session, runs one dialog turn and formats the reply for
//! the caller's handset.
//!
//! A [`Gateway`] owns isolated instances of every store, so tests and
//! embedders can run several side by side. [`Gateway::spawn_maintenance`]
//! starts the periodic sweep; [`Gateway::shutdown`] stops it and drops all
//! state.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::dialog::pattern::PurchaseRequest;
use crate::dialog::purchase::{self, PurchaseState};
use crate::dialog::registration::{self, RegistrationState};
use crate::dialog::{messages, DialogEngine, Outcome, Turn};
use crate::error::GatewayError;
use crate::format::{format_message, DeviceType};
use crate::ledger::Ledger;
use crate::linking::{ConnectionView, LinkResult, LinkingCoordinator};
use crate::ratelimit::{OperationClass, RateLimiter};
use crate::session::{FlowState, Pin, SessionStore};
use crate::validation::{
    is_valid_amount, is_valid_pin, is_valid_session_id, mask_phone, normalize_phone_number,
};

// ---------------------------------------------------------------------------
// Requests & Replies
// ---------------------------------------------------------------------------

/// Which dialog to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowRequest {
    Registration,
    Purchase(PurchaseRequest),
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub session_id: String,
    pub phone_number: String,
    pub device: DeviceType,
    pub flow: FlowRequest,
}

#[derive(Debug, Clone)]
pub struct ContinueRequest {
    pub session_id: String,
    pub phone_number: String,
    pub text: String,
    /// Nonce from the previous reply. Without it no replay check is made.
    pub nonce: Option<String>,
}

/// What the caller shows the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReply {
    pub message: String,
    /// `true` once the dialog is over.
    pub end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Must be echoed on the next `continue`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(skip)]
    pub outcome: Option<Outcome>,
    #[serde(skip)]
    pub truncated: bool,
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sessions: usize,
    pub connections: usize,
    pub rate_counters: usize,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct Gateway {
    config: GatewayConfig,
    sessions: Arc<SessionStore>,
    limiter: Arc<RateLimiter>,
    links: Arc<LinkingCoordinator>,
    ledger: Arc<dyn Ledger>,
    engine: DialogEngine,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .field("links", &self.links)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(config: GatewayConfig, ledger: Arc<dyn Ledger>) -> Self {
        let sessions = Arc::new(SessionStore::from_config(&config));
        let limiter = Arc::new(RateLimiter::new(config.rate_limits));
        let links = Arc::new(LinkingCoordinator::new(
            Arc::clone(&ledger),
            config.link_ttl,
            config.require_link_signature,
        ));
        let engine = DialogEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&limiter),
            Arc::clone(&links),
            config.link_ttl,
        );
        Self {
            config,
            sessions,
            limiter,
            links,
            ledger,
            engine,
            maintenance: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn links(&self) -> &LinkingCoordinator {
        &self.links
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Rate check for callers outside the dialog (e.g. per-IP HTTP limits).
    pub fn check_rate(&self, class: OperationClass, key: &str) -> Result<(), GatewayError> {
        Ok(self.limiter.check(class, key)?)
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    /// Open a dialog and return its first prompt.
    ///
    /// Short-circuits (already registered, not registered, amount out of
    /// range) come back as terminal replies with no session created.
    pub async fn start(&self, request: StartRequest) -> Result<GatewayReply, GatewayError> {
        if !is_valid_session_id(&request.session_id) {
            return Err(GatewayError::Validation("malformed session id".into()));
        }
        let phone = normalize_phone_number(&request.phone_number)
            .ok_or_else(|| GatewayError::Validation("malformed phone number".into()))?;
        self.limiter.check(OperationClass::SessionStart, &phone)?;

        let device = request.device;
        let flow = match request.flow {
            FlowRequest::Registration => match self.ledger.user_exists(&phone).await {
                Ok(true) => {
                    return Ok(self.render(
                        Turn::end(Outcome::Rejected, messages::already_registered()),
                        device,
                        None,
                    ))
                }
                Ok(false) => FlowState::Registration(RegistrationState::new()),
                Err(e) => {
                    tracing::warn!(phone = %mask_phone(&phone), error = %e, "user lookup failed");
                    return Ok(self.render(
                        Turn::end(Outcome::Failed, messages::service_unavailable()),
                        device,
                        None,
                    ));
                }
            },
            FlowRequest::Purchase(purchase) => match self.prepare_purchase(&phone, purchase).await {
                Ok(state) => FlowState::Purchase(state),
                Err(turn) => return Ok(self.render(turn, device, None)),
            },
        };

        let prompt = match &flow {
            FlowState::Registration(_) => registration::initial_prompt(),
            FlowState::Purchase(state) => purchase::initial_prompt(state),
        };
        let flow_type = flow.flow_type();
        let nonce = self.sessions.create(&request.session_id, &phone, device, flow)?;

        tracing::info!(
            session_id = %request.session_id,
            phone = %mask_phone(&phone),
            flow = %flow_type,
            "session started"
        );
        Ok(self.render(
            Turn::reply(prompt),
            device,
            Some((request.session_id, nonce)),
        ))
    }

    /// Validate a purchase and build its initial state, or a terminal turn.
    async fn prepare_purchase(
        &self,
        phone: &str,
        request: PurchaseRequest,
    ) -> Result<PurchaseState, Turn> {
        let pattern = request.pattern();
        if !is_valid_amount(request.amount, self.config.min_amount, self.config.max_amount) {
            return Err(Turn::end(
                Outcome::Rejected,
                messages::amount_out_of_range(self.config.min_amount, self.config.max_amount),
            ));
        }

        let recipient = match request.recipient.as_deref() {
            Some(raw) => match normalize_phone_number(raw) {
                Some(recipient) => Some(recipient),
                None => return Err(Turn::end(Outcome::Rejected, messages::invalid_recipient())),
            },
            None => None,
        };

        match self.ledger.user_exists(phone).await {
            Ok(true) => {}
            Ok(false) => return Err(Turn::end(Outcome::Rejected, messages::not_registered())),
            Err(e) => {
                tracing::warn!(phone = %mask_phone(phone), error = %e, "user lookup failed");
                return Err(Turn::end(Outcome::Failed, messages::service_unavailable()));
            }
        }

        let pin = match request.pin {
            Some(pin) => {
                if let Err(limited) = self.limiter.check(OperationClass::Pin, phone) {
                    return Err(Turn::end(
                        Outcome::RateLimited,
                        messages::rate_limited(limited.retry_after_secs),
                    ));
                }
                if is_valid_pin(&pin) {
                    Some(Pin::new(pin))
                } else {
                    self.limiter.record_failure(OperationClass::Pin, phone);
                    tracing::debug!(phone = %mask_phone(phone), "malformed PIN at start, asking later");
                    None
                }
            }
            None => None,
        };

        Ok(PurchaseState::new(pattern, request.amount, recipient, pin))
    }

    // -----------------------------------------------------------------------
    // continue
    // -----------------------------------------------------------------------

    /// Apply one user input to a live dialog.
    pub async fn continue_session(
        &self,
        request: ContinueRequest,
    ) -> Result<GatewayReply, GatewayError> {
        if !is_valid_session_id(&request.session_id) {
            return Err(GatewayError::Validation("malformed session id".into()));
        }
        let phone = normalize_phone_number(&request.phone_number)
            .ok_or_else(|| GatewayError::Validation("malformed phone number".into()))?;
        let capped: String = request
            .text
            .chars()
            .take(self.config.max_input_length)
            .collect();

        // Held until this turn's outcome is stored, so ledger calls run once.
        let (mut session, _turn) = self
            .sessions
            .begin_turn(&request.session_id, request.nonce.as_deref())?;
        if session.phone_number != phone {
            self.sessions.destroy(&session.session_id);
            tracing::warn!(
                session_id = %session.session_id,
                phone = %mask_phone(&phone),
                "phone number does not own session, destroyed"
            );
            return Err(GatewayError::SessionNotFound);
        }

        let turn = self.engine.advance(&mut session, capped.trim()).await;

        if let Some(outcome) = turn.outcome {
            self.sessions.destroy(&session.session_id);
            tracing::info!(
                session_id = %session.session_id,
                flow = %session.flow_type(),
                outcome = outcome.as_str(),
                "dialog ended"
            );
            return Ok(self.render(turn, session.device, None));
        }

        if !self.sessions.update(&session) {
            return Err(GatewayError::Conflict(
                "session was modified by another request".into(),
            ));
        }
        Ok(self.render(
            turn,
            session.device,
            Some((session.session_id, session.nonce)),
        ))
    }

    // -----------------------------------------------------------------------
    // end
    // -----------------------------------------------------------------------

    /// Terminate a dialog. Unknown sessions are fine.
    pub fn end(&self, session_id: &str) -> Result<GatewayReply, GatewayError> {
        if !is_valid_session_id(session_id) {
            return Err(GatewayError::Validation("malformed session id".into()));
        }
        if self.sessions.destroy(session_id) {
            tracing::info!(session_id, "session ended by caller");
        }
        Ok(GatewayReply {
            message: "ended".into(),
            end: true,
            session_id: None,
            nonce: None,
            connection_id: None,
            outcome: Some(Outcome::Cancelled),
            truncated: false,
        })
    }

    // -----------------------------------------------------------------------
    // Wallet linking
    // -----------------------------------------------------------------------

    pub async fn wallet_callback(
        &self,
        connection_id: &str,
        wallet_address: &str,
        signature: Option<&str>,
        message: Option<&str>,
    ) -> Result<LinkResult, GatewayError> {
        let connection_id = connection_id.trim();
        if connection_id.is_empty() {
            return Err(GatewayError::Validation("missing connection id".into()));
        }
        self.links
            .complete(connection_id, wallet_address, signature, message)
            .await
    }

    pub fn connection_status(&self, connection_id: &str) -> Result<ConnectionView, GatewayError> {
        self.links
            .status(connection_id)
            .ok_or(GatewayError::ConnectionNotFound)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// One maintenance pass over sessions, connections and rate counters.
    pub fn sweep(&self) -> SweepReport {
        SweepReport {
            sessions: self.sessions.sweep_expired(),
            connections: self.links.sweep_expired(),
            rate_counters: self.limiter.purge_stale(),
        }
    }

    /// Start the periodic sweep. Replaces any task already running.
    ///
    /// The task holds only a weak reference and exits once the gateway is
    /// dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) {
        let gateway: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(gateway) = gateway.upgrade() else {
                    break;
                };
                let report = gateway.sweep();
                if report != SweepReport::default() {
                    tracing::debug!(
                        sessions = report.sessions,
                        connections = report.connections,
                        rate_counters = report.rate_counters,
                        "maintenance sweep"
                    );
                }
            }
        });

        if let Some(previous) = self.maintenance.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop maintenance and drop every session, connection and counter.
    pub fn shutdown(&self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        let sessions = self.sessions.len();
        self.sessions.clear();
        self.links.clear();
        self.limiter.clear();
        tracing::info!(dropped_sessions = sessions, "gateway shut down");
    }

    fn render(
        &self,
        turn: Turn,
        device: DeviceType,
        session: Option<(String, String)>,
    ) -> GatewayReply {
        let formatted = format_message(&turn.message, device);
        if formatted.truncated {
            tracing::debug!(
                max_length = formatted.max_length,
                "reply truncated to fit device budget"
            );
        }
        let (session_id, nonce) = match session {
            Some((id, nonce)) => (Some(id), Some(nonce)),
            None => (None, None),
        };
        GatewayReply {
            end: turn.is_terminal(),
            message: formatted.content,
            session_id,
            nonce,
            connection_id: turn.connection_id,
            outcome: turn.outcome,
            truncated: formatted.truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;

    const PHONE: &str = "08031234567";

    fn gateway() -> Gateway {
        Gateway::new(
            GatewayConfig::with_secret(b"gateway unit tests".to_vec()),
            Arc::new(InMemoryLedger::default()),
        )
    }

    fn start_registration(id: &str) -> StartRequest {
        StartRequest {
            session_id: id.into(),
            phone_number: PHONE.into(),
            device: DeviceType::FeaturePhone,
            flow: FlowRequest::Registration,
        }
    }

    #[tokio::test]
    async fn test_start_rejects_bad_session_id() {
        let gw = gateway();
        let err = gw.start(start_registration("bad id")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert!(gw.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_start_returns_menu_and_nonce() {
        let gw = gateway();
        let reply = gw.start(start_registration("gw-test-0001")).await.unwrap();
        assert!(!reply.end);
        assert!(reply.message.contains("1. Create new wallet"));
        assert_eq!(reply.session_id.as_deref(), Some("gw-test-0001"));
        assert!(reply.nonce.is_some());
    }

    #[tokio::test]
    async fn test_continue_requires_owning_phone() {
        let gw = gateway();
        let reply = gw.start(start_registration("gw-test-0002")).await.unwrap();
        let err = gw
            .continue_session(ContinueRequest {
                session_id: "gw-test-0002".into(),
                phone_number: "07031234567".into(),
                text: "1".into(),
                nonce: reply.nonce,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SessionNotFound));
        assert!(!gw.sessions().contains("gw-test-0002"));
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let gw = gateway();
        gw.start(start_registration("gw-test-0003")).await.unwrap();
        let first = gw.end("gw-test-0003").unwrap();
        let second = gw.end("gw-test-0003").unwrap();
        assert_eq!(first.message, "ended");
        assert!(first.end && second.end);
        assert!(gw.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_reply_serialises_camel_case() {
        let gw = gateway();
        let reply = gw.start(start_registration("gw-test-0004")).await.unwrap();
        let json = serde_json::to_value(&reply).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json.get("nonce").is_some());
        assert!(json.get("outcome").is_none());
        assert_eq!(json["end"], false);
    }

    #[tokio::test]
    async fn test_shutdown_clears_state() {
        let gw = Arc::new(gateway());
        gw.spawn_maintenance();
        gw.start(start_registration("gw-test-0005")).await.unwrap();
        assert_eq!(gw.sessions().len(), 1);
        gw.shutdown();
        assert!(gw.sessions().is_empty());
        assert_eq!(gw.limiter().tracked_keys(), 0);
    }
}
