//! Purchase flow.
//!
//! ```text
//! service_selection --1|2--> enter_pin --pin--> confirm_purchase --1--> [createTransaction]
//!                   --1|2 (pre-verified)------> confirm_purchase --2|0--> cancelled
//! ```
//!
//! Entering `confirm_purchase` for a wallet load first fetches a rate quote.

use serde::{Deserialize, Serialize};

use crate::config::{MAX_MENU_ATTEMPTS, MAX_PIN_FORMAT_ATTEMPTS};
use crate::ledger::ExchangeRate;
use crate::session::Pin;
use crate::validation::is_valid_pin;

use super::messages;
use super::pattern::PurchasePattern;
use super::{retry, Effect, Outcome, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStage {
    ServiceSelection,
    EnterPin,
    ConfirmPurchase,
}

impl PurchaseStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceSelection => "service_selection",
            Self::EnterPin => "enter_pin",
            Self::ConfirmPurchase => "confirm_purchase",
        }
    }
}

/// What the money buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseKind {
    /// Crypto credited to the wallet.
    WalletLoad,
    Airtime,
}

impl PurchaseKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::WalletLoad => "wallet load",
            Self::Airtime => "airtime",
        }
    }
}

/// Rate quote captured before confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    pub rate: f64,
    pub asset: String,
    pub source: String,
    pub crypto_amount: f64,
}

impl Calculation {
    pub fn quote(amount: u64, rate: &ExchangeRate) -> Self {
        let crypto_amount = if rate.rate > 0.0 {
            amount as f64 / rate.rate
        } else {
            0.0
        };
        Self {
            rate: rate.rate,
            asset: rate.asset.clone(),
            source: rate.source.clone(),
            crypto_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseState {
    pub stage: PurchaseStage,
    pub pattern: PurchasePattern,
    pub amount: u64,
    /// Canonical recipient number for send-to-other purchases.
    pub recipient: Option<String>,
    pub pin: Option<Pin>,
    pub kind: Option<PurchaseKind>,
    /// PIN arrived with the start request and passed format and rate checks.
    pub pre_verified: bool,
    pub attempts: u8,
    pub calculation: Option<Calculation>,
}

impl PurchaseState {
    pub fn new(
        pattern: PurchasePattern,
        amount: u64,
        recipient: Option<String>,
        pre_verified_pin: Option<Pin>,
    ) -> Self {
        Self {
            stage: PurchaseStage::ServiceSelection,
            pattern,
            amount,
            recipient,
            pre_verified: pre_verified_pin.is_some(),
            pin: pre_verified_pin,
            kind: None,
            attempts: 0,
            calculation: None,
        }
    }

    fn advance(&mut self, stage: PurchaseStage) {
        self.stage = stage;
        self.attempts = 0;
    }

    fn service_menu(&self) -> String {
        messages::service_menu(self.amount, self.recipient.as_deref())
    }

    fn confirm_prompt(&self) -> String {
        messages::confirm_purchase(
            self.amount,
            self.kind.unwrap_or(PurchaseKind::WalletLoad),
            self.recipient.as_deref(),
            self.calculation.as_ref(),
        )
    }

    /// Move to confirmation. Wallet loads need a quote first.
    fn enter_confirmation(&mut self) -> Step {
        self.advance(PurchaseStage::ConfirmPurchase);
        match self.kind {
            Some(PurchaseKind::WalletLoad) => Step::Effect(Effect::FetchRate),
            _ => Step::Reply(self.confirm_prompt()),
        }
    }

    /// Record a quote and return the confirmation prompt.
    pub fn apply_quote(&mut self, rate: &ExchangeRate) -> String {
        self.calculation = Some(Calculation::quote(self.amount, rate));
        self.confirm_prompt()
    }
}

/// The prompt shown on entering the flow.
pub fn initial_prompt(state: &PurchaseState) -> String {
    state.service_menu()
}

/// Apply one user input.
pub fn step(state: &mut PurchaseState, input: &str) -> Step {
    match state.stage {
        PurchaseStage::ServiceSelection => {
            let kind = match input {
                "1" => PurchaseKind::WalletLoad,
                "2" => PurchaseKind::Airtime,
                _ => {
                    let prompt = messages::invalid_choice(&state.service_menu());
                    return retry(&mut state.attempts, MAX_MENU_ATTEMPTS, prompt);
                }
            };
            state.kind = Some(kind);
            if state.pre_verified {
                state.enter_confirmation()
            } else {
                state.advance(PurchaseStage::EnterPin);
                Step::Reply(messages::enter_pin_prompt())
            }
        }

        PurchaseStage::EnterPin => {
            if is_valid_pin(input) {
                state.pin = Some(Pin::new(input));
                state.enter_confirmation()
            } else {
                retry(
                    &mut state.attempts,
                    MAX_PIN_FORMAT_ATTEMPTS,
                    messages::invalid_pin(&messages::enter_pin_prompt()),
                )
            }
        }

        PurchaseStage::ConfirmPurchase => match input {
            "1" => Step::Effect(Effect::CreateTransaction),
            "2" | "0" => Step::End(Outcome::Cancelled, messages::purchase_cancelled()),
            _ => {
                let prompt = messages::invalid_choice(&state.confirm_prompt());
                retry(&mut state.attempts, MAX_MENU_ATTEMPTS, prompt)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> PurchaseState {
        PurchaseState::new(PurchasePattern::Fallback, 1_000, None, None)
    }

    fn rate() -> ExchangeRate {
        ExchangeRate {
            rate: 1_600.0,
            asset: "USDC".into(),
            source: "test".into(),
        }
    }

    #[test]
    fn test_fallback_asks_for_pin() {
        let mut state = fallback();
        match step(&mut state, "2") {
            Step::Reply(msg) => assert_eq!(msg, messages::enter_pin_prompt()),
            other => panic!("unexpected step: {:?}", other),
        }
        assert_eq!(state.stage, PurchaseStage::EnterPin);

        // Airtime confirmation needs no quote.
        match step(&mut state, "1234") {
            Step::Reply(msg) => assert!(msg.contains("airtime")),
            other => panic!("unexpected step: {:?}", other),
        }
        assert_eq!(state.stage, PurchaseStage::ConfirmPurchase);
        assert!(matches!(
            step(&mut state, "1"),
            Step::Effect(Effect::CreateTransaction)
        ));
    }

    #[test]
    fn test_pre_verified_skips_pin_entry() {
        let mut state =
            PurchaseState::new(PurchasePattern::BuyForSelf, 1_000, None, Some(Pin::new("1234")));
        assert!(state.pre_verified);
        assert!(matches!(step(&mut state, "1"), Step::Effect(Effect::FetchRate)));
        assert_eq!(state.stage, PurchaseStage::ConfirmPurchase);

        let prompt = state.apply_quote(&rate());
        assert!(prompt.contains("0.6250 USDC"));
        assert_eq!(state.calculation.as_ref().map(|c| c.rate), Some(1_600.0));
    }

    #[test]
    fn test_cancel_paths() {
        for input in ["2", "0"] {
            let mut state = fallback();
            step(&mut state, "2");
            step(&mut state, "1234");
            assert!(matches!(
                step(&mut state, input),
                Step::End(Outcome::Cancelled, _)
            ));
        }
    }

    #[test]
    fn test_three_bad_pins_cancel() {
        let mut state = fallback();
        step(&mut state, "1");
        assert!(matches!(step(&mut state, "12"), Step::Reply(_)));
        assert!(matches!(step(&mut state, "12ab"), Step::Reply(_)));
        assert!(matches!(
            step(&mut state, ""),
            Step::End(Outcome::AttemptsExceeded, _)
        ));
    }

    #[test]
    fn test_unrecognised_service_reprompts() {
        let mut state = fallback();
        match step(&mut state, "7") {
            Step::Reply(msg) => {
                assert!(msg.starts_with("Invalid choice."));
                assert!(msg.contains("1. Load wallet"));
            }
            other => panic!("unexpected step: {:?}", other),
        }
        assert_eq!(state.attempts, 1);
        assert_eq!(state.stage, PurchaseStage::ServiceSelection);
    }

    #[test]
    fn test_zero_rate_does_not_divide() {
        let calc = Calculation::quote(
            1_000,
            &ExchangeRate {
                rate: 0.0,
                asset: "USDC".into(),
                source: "broken".into(),
            },
        );
        assert_eq!(calc.crypto_amount, 0.0);
    }
}
