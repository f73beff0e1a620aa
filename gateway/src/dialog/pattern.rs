//! Purchase request shapes.
//!
//! A purchase can be started with a structured payload or with the dial
//! string the user typed on the handset. Dial strings are split on `*` and
//! the segment count alone decides the shape:
//!
//! | Dial string                      | Segments after the code | Pattern         |
//! |----------------------------------|-------------------------|-----------------|
//! | `*384*1000*1234#`                | amount, pin             | `buy_for_self`  |
//! | `*384*08031234567*1000*1234#`    | recipient, amount, pin  | `send_to_other` |
//! | `*384*1000#`                     | amount                  | `fallback`      |

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the purchase was specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchasePattern {
    /// Amount and PIN for the caller's own wallet.
    BuyForSelf,
    /// Recipient, amount and PIN.
    SendToOther,
    /// Amount only; the PIN is asked for during the dialog.
    Fallback,
}

impl PurchasePattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuyForSelf => "buy_for_self",
            Self::SendToOther => "send_to_other",
            Self::Fallback => "fallback",
        }
    }
}

/// Parameters of a purchase, parsed once at session start.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub amount: u64,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

impl std::fmt::Debug for PurchaseRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurchaseRequest")
            .field("amount", &self.amount)
            .field("recipient", &self.recipient)
            .field("pin", &self.pin.as_ref().map(|_| "****"))
            .finish()
    }
}

impl PurchaseRequest {
    pub fn pattern(&self) -> PurchasePattern {
        match (&self.recipient, &self.pin) {
            (Some(_), _) => PurchasePattern::SendToOther,
            (None, Some(_)) => PurchasePattern::BuyForSelf,
            (None, None) => PurchasePattern::Fallback,
        }
    }
}

/// Why a dial string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("dial string must look like *CODE*...#")]
    Malformed,

    #[error("expected 1 to 3 parameters after the service code, got {0}")]
    WrongArity(usize),

    #[error("segment {0:?} is not numeric")]
    NotNumeric(String),

    #[error("amount out of range")]
    AmountOverflow,
}

impl FromStr for PurchaseRequest {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix('*')
            .and_then(|rest| rest.strip_suffix('#'))
            .ok_or(PatternError::Malformed)?;

        let segments: Vec<&str> = body.split('*').collect();
        for segment in &segments {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(PatternError::NotNumeric(segment.to_string()));
            }
        }

        // segments[0] is the service code itself.
        let params = &segments[1..];
        let amount = |raw: &str| raw.parse::<u64>().map_err(|_| PatternError::AmountOverflow);

        match *params {
            [amount_raw] => Ok(Self {
                amount: amount(amount_raw)?,
                recipient: None,
                pin: None,
            }),
            [amount_raw, pin] => Ok(Self {
                amount: amount(amount_raw)?,
                recipient: None,
                pin: Some(pin.to_string()),
            }),
            [recipient, amount_raw, pin] => Ok(Self {
                amount: amount(amount_raw)?,
                recipient: Some(recipient.to_string()),
                pin: Some(pin.to_string()),
            }),
            _ => Err(PatternError::WrongArity(params.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_for_self() {
        let req: PurchaseRequest = "*384*1000*1234#".parse().unwrap();
        assert_eq!(req.amount, 1000);
        assert_eq!(req.pin.as_deref(), Some("1234"));
        assert_eq!(req.recipient, None);
        assert_eq!(req.pattern(), PurchasePattern::BuyForSelf);
    }

    #[test]
    fn test_send_to_other() {
        let req: PurchaseRequest = "*384*08031234567*1000*1234#".parse().unwrap();
        assert_eq!(req.recipient.as_deref(), Some("08031234567"));
        assert_eq!(req.amount, 1000);
        assert_eq!(req.pattern(), PurchasePattern::SendToOther);
    }

    #[test]
    fn test_fallback() {
        let req: PurchaseRequest = "*384*1000#".parse().unwrap();
        assert_eq!(req.amount, 1000);
        assert!(req.pin.is_none());
        assert_eq!(req.pattern(), PurchasePattern::Fallback);
    }

    #[test]
    fn test_short_recipient_is_still_send_to_other() {
        // Shape is decided by segment count, not by segment length.
        let req: PurchaseRequest = "*384*0803*1000*1234#".parse().unwrap();
        assert_eq!(req.pattern(), PurchasePattern::SendToOther);
    }

    #[test]
    fn test_rejections() {
        assert_eq!("384*1000#".parse::<PurchaseRequest>(), Err(PatternError::Malformed));
        assert_eq!("*384*1000".parse::<PurchaseRequest>(), Err(PatternError::Malformed));
        assert_eq!("*384#".parse::<PurchaseRequest>(), Err(PatternError::WrongArity(0)));
        assert_eq!(
            "*384*1*2*3*4#".parse::<PurchaseRequest>(),
            Err(PatternError::WrongArity(4))
        );
        assert!(matches!(
            "*384*abc#".parse::<PurchaseRequest>(),
            Err(PatternError::NotNumeric(_))
        ));
        assert!(matches!(
            "*384**1000#".parse::<PurchaseRequest>(),
            Err(PatternError::NotNumeric(_))
        ));
        assert_eq!(
            "*384*99999999999999999999999#".parse::<PurchaseRequest>(),
            Err(PatternError::AmountOverflow)
        );
    }

    #[test]
    fn test_structured_payload_deserialises() {
        let req: PurchaseRequest = serde_json::from_str(r#"{"amount": 500}"#).unwrap();
        assert_eq!(req.pattern(), PurchasePattern::Fallback);
        assert!(!format!("{:?}", PurchaseRequest { pin: Some("9999".into()), ..req }).contains("9999"));
    }
}
