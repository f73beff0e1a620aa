//! # Message Formatting
//!
//! Every outbound dialog message must fit the handset's transcript budget.
//! Overlong messages are cut at the last word boundary that leaves room for
//! an ellipsis; text with no usable whitespace is hard-cut instead.
//!
//! Lengths are counted in characters, not bytes. Formatting is idempotent:
//! output is always within budget, so formatting it again is a no-op.

use serde::{Deserialize, Serialize};

use crate::config::{ELLIPSIS, FEATURE_PHONE_MAX_MESSAGE_LENGTH, SMARTPHONE_MAX_MESSAGE_LENGTH};

/// Handset class, as far as the dialog cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Can open a wallet app and complete out-of-band linking.
    Smartphone,
    /// Plain USSD handset.
    #[default]
    FeaturePhone,
}

impl DeviceType {
    /// Interpret a free-form device hint from the aggregator.
    ///
    /// Unknown or missing hints fall back to [`DeviceType::FeaturePhone`].
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(|h| h.trim().to_ascii_lowercase()).as_deref() {
            Some("smartphone" | "smart" | "android" | "ios" | "iphone") => Self::Smartphone,
            _ => Self::FeaturePhone,
        }
    }

    /// Transcript budget for this handset class.
    pub fn max_message_length(self) -> usize {
        match self {
            Self::Smartphone => SMARTPHONE_MAX_MESSAGE_LENGTH,
            Self::FeaturePhone => FEATURE_PHONE_MAX_MESSAGE_LENGTH,
        }
    }

    /// Whether the handset can complete wallet linking in a separate app.
    pub fn supports_wallet_linking(self) -> bool {
        matches!(self, Self::Smartphone)
    }
}

/// Result of fitting a message into its budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedMessage {
    pub content: String,
    pub truncated: bool,
    /// Length of `content` in characters.
    pub length: usize,
    pub max_length: usize,
}

/// Fit `content` into the budget for `device`.
pub fn format_message(content: &str, device: DeviceType) -> FormattedMessage {
    fit_to_length(content, device.max_message_length())
}

/// Fit `content` into `max_length` characters.
pub fn fit_to_length(content: &str, max_length: usize) -> FormattedMessage {
    let length = content.chars().count();
    if length <= max_length {
        return FormattedMessage {
            content: content.to_string(),
            truncated: false,
            length,
            max_length,
        };
    }

    let ellipsis_len = ELLIPSIS.chars().count();
    let content = if max_length < ellipsis_len {
        content.chars().take(max_length).collect()
    } else {
        word_boundary_cut(content, max_length - ellipsis_len)
            .filter(|cut| cut.chars().count() <= max_length)
            .unwrap_or_else(|| hard_cut(content, max_length - ellipsis_len))
    };

    FormattedMessage {
        length: content.chars().count(),
        content,
        truncated: true,
        max_length,
    }
}

/// Cut at the last whitespace at or before `budget` characters.
fn word_boundary_cut(content: &str, budget: usize) -> Option<String> {
    let window: String = content.chars().take(budget + 1).collect();
    let (idx, _) = window.char_indices().rev().find(|(_, c)| c.is_whitespace())?;
    let head = window[..idx].trim_end();
    if head.is_empty() {
        return None;
    }
    Some(format!("{}{}", head, ELLIPSIS))
}

fn hard_cut(content: &str, budget: usize) -> String {
    let head: String = content.chars().take(budget).collect();
    format!("{}{}", head, ELLIPSIS)
}
