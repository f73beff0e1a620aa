//! Registration flow.
//!
//! ```text
//! wallet_type_selection --1--> new_wallet_pin_setup --pin--> new_wallet_pin_confirm --match--> [registerUser]
//!                       --2--> link_wallet_pin_setup --pin--> link_wallet_pin_confirm --match--> [create link]
//! ```

use serde::{Deserialize, Serialize};

use crate::config::{MAX_MENU_ATTEMPTS, MAX_PIN_CONFIRM_ATTEMPTS, MAX_PIN_FORMAT_ATTEMPTS};
use crate::format::DeviceType;
use crate::session::Pin;
use crate::validation::is_valid_pin;

use super::messages;
use super::{retry, Effect, Outcome, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStage {
    WalletTypeSelection,
    NewWalletPinSetup,
    NewWalletPinConfirm,
    LinkWalletPinSetup,
    LinkWalletPinConfirm,
}

impl RegistrationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WalletTypeSelection => "wallet_type_selection",
            Self::NewWalletPinSetup => "new_wallet_pin_setup",
            Self::NewWalletPinConfirm => "new_wallet_pin_confirm",
            Self::LinkWalletPinSetup => "link_wallet_pin_setup",
            Self::LinkWalletPinConfirm => "link_wallet_pin_confirm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationState {
    pub stage: RegistrationStage,
    /// PIN chosen at the setup stage, awaiting confirmation.
    pub temp_pin: Option<Pin>,
    /// Consecutive bad inputs on the current stage.
    pub attempts: u8,
}

impl Default for RegistrationState {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationState {
    pub fn new() -> Self {
        Self {
            stage: RegistrationStage::WalletTypeSelection,
            temp_pin: None,
            attempts: 0,
        }
    }

    fn advance(&mut self, stage: RegistrationStage) {
        self.stage = stage;
        self.attempts = 0;
    }
}

/// The prompt shown on entering the flow.
pub fn initial_prompt() -> String {
    messages::wallet_type_menu()
}

/// Apply one user input.
pub fn step(state: &mut RegistrationState, input: &str, device: DeviceType) -> Step {
    use RegistrationStage::*;

    match state.stage {
        WalletTypeSelection => match input {
            "1" => {
                state.advance(NewWalletPinSetup);
                Step::Reply(messages::new_wallet_pin_prompt())
            }
            "2" if device.supports_wallet_linking() => {
                state.advance(LinkWalletPinSetup);
                Step::Reply(messages::link_wallet_pin_prompt())
            }
            "2" => Step::End(Outcome::Rejected, messages::linking_needs_smartphone()),
            _ => retry(
                &mut state.attempts,
                MAX_MENU_ATTEMPTS,
                messages::invalid_choice(&messages::wallet_type_menu()),
            ),
        },

        NewWalletPinSetup | LinkWalletPinSetup => {
            if is_valid_pin(input) {
                state.temp_pin = Some(Pin::new(input));
                let next = if state.stage == NewWalletPinSetup {
                    NewWalletPinConfirm
                } else {
                    LinkWalletPinConfirm
                };
                state.advance(next);
                Step::Reply(messages::confirm_pin_prompt())
            } else {
                let prompt = if state.stage == NewWalletPinSetup {
                    messages::new_wallet_pin_prompt()
                } else {
                    messages::link_wallet_pin_prompt()
                };
                retry(
                    &mut state.attempts,
                    MAX_PIN_FORMAT_ATTEMPTS,
                    messages::invalid_pin(&prompt),
                )
            }
        }

        NewWalletPinConfirm | LinkWalletPinConfirm => match &state.temp_pin {
            Some(pin) if pin.matches(input) => {
                let pin = pin.clone();
                if state.stage == NewWalletPinConfirm {
                    Step::Effect(Effect::RegisterUser { pin })
                } else {
                    Step::Effect(Effect::CreateLink { pin })
                }
            }
            Some(_) => retry(
                &mut state.attempts,
                MAX_PIN_CONFIRM_ATTEMPTS,
                messages::pin_mismatch(),
            ),
            // A confirm stage is only reachable with a PIN set.
            None => Step::End(Outcome::Failed, messages::service_unavailable()),
        },
    }
}
