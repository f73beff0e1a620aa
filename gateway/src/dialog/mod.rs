//! # Dialog State Machine
//!
//! Each flow is a table of stage handlers. A handler is a pure function of
//! `(state, input)` that mutates the flow state and returns a [`Step`]:
//! a reply that keeps the dialog open, a terminal message, or an [`Effect`]
//! that needs the ledger or the linking coordinator.
//!
//! [`DialogEngine`] runs handlers and resolves effects. Collaborator
//! failures always end the dialog; nothing is retried automatically.

pub mod messages;
pub mod pattern;
pub mod purchase;
pub mod registration;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::ledger::{Ledger, LedgerError, TransactionRequest};
use crate::linking::LinkingCoordinator;
use crate::ratelimit::{OperationClass, RateLimiter};
use crate::session::{FlowState, Pin, Session};
use crate::validation::{is_valid_pin, mask_phone};

use purchase::{PurchaseKind, PurchaseStage};

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Side effects a handler may request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RegisterUser { pin: Pin },
    CreateLink { pin: Pin },
    FetchRate,
    CreateTransaction,
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Reply(String),
    End(Outcome, String),
    Effect(Effect),
}

/// How a dialog ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    /// Handed off to the wallet app.
    LinkPending,
    Cancelled,
    AttemptsExceeded,
    /// Refused before any ledger mutation (guidance or bad start input).
    Rejected,
    RateLimited,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::LinkPending => "link_pending",
            Self::Cancelled => "cancelled",
            Self::AttemptsExceeded => "attempts_exceeded",
            Self::Rejected => "rejected",
            Self::RateLimited => "rate_limited",
            Self::Failed => "failed",
        }
    }
}

/// Count a bad input; end the dialog once `ceiling` is reached.
pub(crate) fn retry(attempts: &mut u8, ceiling: u8, reprompt: String) -> Step {
    *attempts = attempts.saturating_add(1);
    if *attempts >= ceiling {
        Step::End(Outcome::AttemptsExceeded, messages::too_many_attempts())
    } else {
        Step::Reply(reprompt)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// What one turn produced, before device formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub message: String,
    /// `Some` when the dialog is over.
    pub outcome: Option<Outcome>,
    /// Linking token, when the turn opened one.
    pub connection_id: Option<String>,
}

impl Turn {
    pub fn reply(message: String) -> Self {
        Self {
            message,
            outcome: None,
            connection_id: None,
        }
    }

    pub fn end(outcome: Outcome, message: String) -> Self {
        Self {
            message,
            outcome: Some(outcome),
            connection_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Drives flows and resolves their effects.
pub struct DialogEngine {
    ledger: Arc<dyn Ledger>,
    limiter: Arc<RateLimiter>,
    links: Arc<LinkingCoordinator>,
    link_ttl: Duration,
}

impl DialogEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        limiter: Arc<RateLimiter>,
        links: Arc<LinkingCoordinator>,
        link_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            limiter,
            links,
            link_ttl,
        }
    }

    /// Apply `input` to `session`, mutating its flow state.
    pub async fn advance(&self, session: &mut Session, input: &str) -> Turn {
        let stage = session.flow.stage_name();
        let step = match &mut session.flow {
            FlowState::Registration(state) => registration::step(state, input, session.device),
            FlowState::Purchase(state) => {
                if state.stage == PurchaseStage::EnterPin {
                    if let Err(limited) = self.limiter.check(OperationClass::Pin, &session.phone_number) {
                        return Turn::end(
                            Outcome::RateLimited,
                            messages::rate_limited(limited.retry_after_secs),
                        );
                    }
                    if !is_valid_pin(input) {
                        self.limiter
                            .record_failure(OperationClass::Pin, &session.phone_number);
                    }
                }
                purchase::step(state, input)
            }
        };

        tracing::debug!(
            session_id = %session.session_id,
            from = stage,
            to = session.flow.stage_name(),
            "dialog step"
        );

        match step {
            Step::Reply(message) => Turn::reply(message),
            Step::End(outcome, message) => Turn::end(outcome, message),
            Step::Effect(effect) => self.run(session, effect).await,
        }
    }

    async fn run(&self, session: &mut Session, effect: Effect) -> Turn {
        let phone = session.phone_number.clone();
        match effect {
            Effect::RegisterUser { pin } => {
                if let Err(limited) = self.limiter.check(OperationClass::Registration, &phone) {
                    return Turn::end(
                        Outcome::RateLimited,
                        messages::rate_limited(limited.retry_after_secs),
                    );
                }
                match self.ledger.register_user(&phone, pin.as_str()).await {
                    Ok(registration) => {
                        tracing::info!(phone = %mask_phone(&phone), "wallet registered");
                        Turn::end(
                            Outcome::Completed,
                            messages::registration_complete(&registration.identifier),
                        )
                    }
                    Err(e) => {
                        tracing::warn!(phone = %mask_phone(&phone), error = %e, "registration failed");
                        Turn::end(Outcome::Failed, messages::registration_failed(&e.to_string()))
                    }
                }
            }

            Effect::CreateLink { pin } => {
                let connection_id = self.links.create(&session.session_id, &phone, pin);
                let mut turn = Turn::end(
                    Outcome::LinkPending,
                    messages::link_pending(&connection_id, self.link_ttl),
                );
                turn.connection_id = Some(connection_id);
                turn
            }

            Effect::FetchRate => {
                let FlowState::Purchase(state) = &mut session.flow else {
                    return Turn::end(Outcome::Failed, messages::service_unavailable());
                };
                match self.ledger.best_rate(state.amount).await {
                    Ok(rate) => Turn::reply(state.apply_quote(&rate)),
                    Err(e) => {
                        tracing::warn!(session_id = %session.session_id, error = %e, "rate quote failed");
                        Turn::end(Outcome::Failed, messages::rate_unavailable())
                    }
                }
            }

            Effect::CreateTransaction => {
                let FlowState::Purchase(state) = &session.flow else {
                    return Turn::end(Outcome::Failed, messages::service_unavailable());
                };
                let Some(pin) = &state.pin else {
                    return Turn::end(Outcome::Failed, messages::service_unavailable());
                };
                if let Err(limited) = self.limiter.check(OperationClass::Transaction, &phone) {
                    return Turn::end(
                        Outcome::RateLimited,
                        messages::rate_limited(limited.retry_after_secs),
                    );
                }

                let kind = state.kind.unwrap_or(PurchaseKind::WalletLoad);
                let request = TransactionRequest {
                    phone_number: phone.clone(),
                    pin: pin.as_str().to_string(),
                    amount: state.amount,
                    kind,
                    recipient: state.recipient.clone(),
                };
                match self.ledger.create_transaction(&request).await {
                    Ok(receipt) => {
                        self.limiter.reset(OperationClass::Pin, &phone);
                        tracing::info!(
                            phone = %mask_phone(&phone),
                            amount = request.amount,
                            kind = kind.label(),
                            pattern = state.pattern.as_str(),
                            "purchase completed"
                        );
                        Turn::end(
                            Outcome::Completed,
                            messages::purchase_complete(request.amount, kind, &receipt.signature),
                        )
                    }
                    Err(e) => {
                        if e == LedgerError::InvalidPin {
                            self.limiter.record_failure(OperationClass::Pin, &phone);
                        }
                        tracing::warn!(phone = %mask_phone(&phone), error = %e, "purchase failed");
                        Turn::end(Outcome::Failed, messages::purchase_failed(&e.to_string()))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RateLimitRule};
    use crate::format::DeviceType;
    use crate::ledger::{InMemoryLedger, LedgerOp};
    use chrono::Utc;
    use pattern::PurchasePattern;
    use purchase::PurchaseState;
    use registration::RegistrationState;

    const PHONE: &str = "08031234567";

    struct Harness {
        ledger: Arc<InMemoryLedger>,
        limiter: Arc<RateLimiter>,
        links: Arc<LinkingCoordinator>,
        engine: DialogEngine,
    }

    fn harness(ledger: InMemoryLedger, rules: RateLimitConfig) -> Harness {
        let ledger = Arc::new(ledger);
        let limiter = Arc::new(RateLimiter::new(rules));
        let links = Arc::new(LinkingCoordinator::new(
            ledger.clone(),
            Duration::from_secs(600),
            false,
        ));
        let engine = DialogEngine::new(
            ledger.clone(),
            limiter.clone(),
            links.clone(),
            Duration::from_secs(600),
        );
        Harness {
            ledger,
            limiter,
            links,
            engine,
        }
    }

    fn session(flow: FlowState, device: DeviceType) -> Session {
        Session {
            session_id: "engine-test-1".into(),
            nonce: "n".into(),
            phone_number: PHONE.into(),
            device,
            flow,
            created_at: Utc::now(),
            last_activity: Utc::now(),
        }
    }

    fn fallback_purchase() -> FlowState {
        FlowState::Purchase(PurchaseState::new(PurchasePattern::Fallback, 1_000, None, None))
    }

    #[tokio::test]
    async fn test_registration_calls_ledger() {
        let h = harness(InMemoryLedger::default(), RateLimitConfig::default());
        let mut s = session(
            FlowState::Registration(RegistrationState::new()),
            DeviceType::FeaturePhone,
        );
        for input in ["1", "1234"] {
            assert!(!h.engine.advance(&mut s, input).await.is_terminal());
        }
        let turn = h.engine.advance(&mut s, "1234").await;
        assert_eq!(turn.outcome, Some(Outcome::Completed));
        assert!(turn.message.starts_with("Wallet created!"));
        assert!(h.ledger.is_registered(PHONE));
    }

    #[tokio::test]
    async fn test_registration_failure_is_terminal() {
        let ledger = InMemoryLedger::default();
        ledger.fail(LedgerOp::RegisterUser, LedgerError::Unavailable("rpc down".into()));
        let h = harness(ledger, RateLimitConfig::default());
        let mut s = session(
            FlowState::Registration(RegistrationState::new()),
            DeviceType::FeaturePhone,
        );
        h.engine.advance(&mut s, "1").await;
        h.engine.advance(&mut s, "1234").await;
        let turn = h.engine.advance(&mut s, "1234").await;
        assert_eq!(turn.outcome, Some(Outcome::Failed));
        assert!(turn.message.contains("rpc down"));
    }

    #[tokio::test]
    async fn test_registration_rate_limited_before_ledger() {
        let mut rules = RateLimitConfig::default();
        rules.registration = RateLimitRule::new(0, Duration::from_secs(60));
        let h = harness(InMemoryLedger::default(), rules);
        let mut s = session(
            FlowState::Registration(RegistrationState::new()),
            DeviceType::FeaturePhone,
        );
        h.engine.advance(&mut s, "1").await;
        h.engine.advance(&mut s, "1234").await;
        let turn = h.engine.advance(&mut s, "1234").await;
        assert_eq!(turn.outcome, Some(Outcome::RateLimited));
        assert_eq!(h.ledger.calls(LedgerOp::RegisterUser), 0);
    }

    #[tokio::test]
    async fn test_link_creates_connection() {
        let h = harness(InMemoryLedger::default(), RateLimitConfig::default());
        let mut s = session(
            FlowState::Registration(RegistrationState::new()),
            DeviceType::Smartphone,
        );
        h.engine.advance(&mut s, "2").await;
        h.engine.advance(&mut s, "1234").await;
        let turn = h.engine.advance(&mut s, "1234").await;
        assert_eq!(turn.outcome, Some(Outcome::LinkPending));
        let id = turn.connection_id.expect("connection id");
        assert!(turn.message.contains(&id));
        assert!(h.links.status(&id).is_some());
    }

    #[tokio::test]
    async fn test_purchase_wallet_load_with_quote() {
        let h = harness(
            InMemoryLedger::default().with_user(PHONE, "1234"),
            RateLimitConfig::default(),
        );
        let mut s = session(fallback_purchase(), DeviceType::FeaturePhone);
        h.engine.advance(&mut s, "1").await;
        let confirm = h.engine.advance(&mut s, "1234").await;
        assert!(confirm.message.contains("USDC"));
        assert_eq!(h.ledger.calls(LedgerOp::BestRate), 1);

        let done = h.engine.advance(&mut s, "1").await;
        assert_eq!(done.outcome, Some(Outcome::Completed));
        assert!(done.message.starts_with("Success!"));
    }

    #[tokio::test]
    async fn test_rate_failure_ends_dialog() {
        let ledger = InMemoryLedger::default().with_user(PHONE, "1234");
        ledger.fail(LedgerOp::BestRate, LedgerError::Unavailable("no venue".into()));
        let h = harness(ledger, RateLimitConfig::default());
        let mut s = session(fallback_purchase(), DeviceType::FeaturePhone);
        h.engine.advance(&mut s, "1").await;
        let turn = h.engine.advance(&mut s, "1234").await;
        assert_eq!(turn.outcome, Some(Outcome::Failed));
    }

    #[tokio::test]
    async fn test_wrong_pin_counts_against_pin_limit() {
        let h = harness(
            InMemoryLedger::default().with_user(PHONE, "1234"),
            RateLimitConfig::default(),
        );
        let mut s = session(fallback_purchase(), DeviceType::FeaturePhone);
        h.engine.advance(&mut s, "2").await;
        h.engine.advance(&mut s, "9999").await;
        let turn = h.engine.advance(&mut s, "1").await;
        assert_eq!(turn.outcome, Some(Outcome::Failed));
        assert!(turn.message.contains("invalid PIN"));
        assert_eq!(h.limiter.tracked_keys(), 2); // pin failure + transaction counter
    }

    #[tokio::test]
    async fn test_pin_entry_blocked_when_rate_limited() {
        let mut rules = RateLimitConfig::default();
        rules.pin = RateLimitRule::new(1, Duration::from_secs(60));
        let h = harness(InMemoryLedger::default().with_user(PHONE, "1234"), rules);
        let mut s = session(fallback_purchase(), DeviceType::FeaturePhone);
        h.engine.advance(&mut s, "2").await;
        // Malformed PIN is recorded as a failure...
        assert!(!h.engine.advance(&mut s, "12").await.is_terminal());
        // ...which exhausts the single allowed failure.
        let turn = h.engine.advance(&mut s, "1234").await;
        assert_eq!(turn.outcome, Some(Outcome::RateLimited));
    }
}
