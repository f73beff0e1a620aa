//! The decrypted session record handed to the dialog engine for one turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dialog::purchase::PurchaseState;
use crate::dialog::registration::RegistrationState;
use crate::format::DeviceType;

/// A user PIN held in memory for the duration of a flow.
///
/// `Debug` never prints the digits.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pin(String);

impl Pin {
    pub fn new(digits: impl Into<String>) -> Self {
        Self(digits.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against raw user input.
    pub fn matches(&self, input: &str) -> bool {
        self.0 == input
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Which dialog a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Registration,
    Purchase,
}

impl FlowType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Purchase => "purchase",
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flow-scoped state. The variant is fixed at creation; handlers only ever
/// mutate the inner state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowState {
    Registration(RegistrationState),
    Purchase(PurchaseState),
}

impl FlowState {
    pub fn flow_type(&self) -> FlowType {
        match self {
            Self::Registration(_) => FlowType::Registration,
            Self::Purchase(_) => FlowType::Purchase,
        }
    }

    /// Stage label for logs.
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Registration(state) => state.stage.as_str(),
            Self::Purchase(state) => state.stage.as_str(),
        }
    }
}

/// One USSD dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Rotates on every successful read; the client must echo it back.
    pub nonce: String,
    /// Canonical local-format number.
    pub phone_number: String,
    pub device: DeviceType,
    pub flow: FlowState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_debug_is_redacted() {
        let pin = Pin::new("1234");
        assert_eq!(format!("{:?}", pin), "Pin(****)");
        assert!(pin.matches("1234"));
        assert!(!pin.matches("4321"));
    }

    #[test]
    fn test_flow_type_follows_variant() {
        let flow = FlowState::Registration(RegistrationState::new());
        assert_eq!(flow.flow_type(), FlowType::Registration);
        assert_eq!(flow.stage_name(), "wallet_type_selection");
    }
}
