//! Dialog copy. Every string a user can see is built here.

use std::time::Duration;

use super::purchase::{Calculation, PurchaseKind};

/// Render a local-currency amount with thousands separators: `N1,000`.
pub fn naira(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    out.push('N');
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Longest asset or rate-source label shown in a quote.
const QUOTE_LABEL_CHARS: usize = 12;

fn minutes(d: Duration) -> u64 {
    d.as_secs().div_ceil(60).max(1)
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

pub fn invalid_choice(prompt: &str) -> String {
    format!("Invalid choice.\n{}", prompt)
}

pub fn invalid_pin(prompt: &str) -> String {
    format!("Invalid PIN. Use 4-6 digits.\n{}", prompt)
}

pub fn too_many_attempts() -> String {
    "Too many invalid attempts. Session cancelled.".into()
}

pub fn rate_limited(retry_after_secs: u64) -> String {
    format!(
        "Too many attempts. Try again in {} min.",
        minutes(Duration::from_secs(retry_after_secs))
    )
}

pub fn service_unavailable() -> String {
    "Service temporarily unavailable. Please try again later.".into()
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub fn wallet_type_menu() -> String {
    "Welcome! Set up your wallet:\n1. Create new wallet\n2. Link existing wallet".into()
}

pub fn already_registered() -> String {
    "This number already has a wallet. Dial the purchase code to buy crypto or airtime.".into()
}

pub fn new_wallet_pin_prompt() -> String {
    "Create a 4-6 digit PIN for your new wallet:".into()
}

pub fn link_wallet_pin_prompt() -> String {
    "Create a 4-6 digit PIN to secure your linked wallet:".into()
}

pub fn confirm_pin_prompt() -> String {
    "Re-enter your PIN to confirm:".into()
}

pub fn pin_mismatch() -> String {
    format!("PINs do not match. {}", confirm_pin_prompt())
}

pub fn linking_needs_smartphone() -> String {
    "Linking needs a smartphone with a wallet app. Dial again and choose 1 to create a wallet on this phone.".into()
}

pub fn registration_complete(identifier: &str) -> String {
    format!("Wallet created! Wallet ID: {}. Keep your PIN safe.", identifier)
}

pub fn registration_failed(reason: &str) -> String {
    format!("Registration failed: {}. Please try again later.", reason)
}

pub fn link_pending(connection_id: &str, ttl: Duration) -> String {
    format!(
        "PIN saved. Open your wallet app and approve code LINK:{} within {} min.",
        connection_id,
        minutes(ttl)
    )
}

// ---------------------------------------------------------------------------
// Purchase
// ---------------------------------------------------------------------------

pub fn not_registered() -> String {
    "No wallet found for this number. Dial the registration code to create one.".into()
}

pub fn amount_out_of_range(min: u64, max: u64) -> String {
    format!("Amount must be between {} and {}.", naira(min), naira(max))
}

pub fn invalid_recipient() -> String {
    "Recipient number is not valid. Please check and dial again.".into()
}

pub fn service_menu(amount: u64, recipient: Option<&str>) -> String {
    let header = match recipient {
        Some(recipient) => format!("Send {} to {}:", naira(amount), recipient),
        None => format!("Buy {}:", naira(amount)),
    };
    format!("{}\n1. Load wallet (crypto)\n2. Buy airtime", header)
}

pub fn enter_pin_prompt() -> String {
    "Enter your wallet PIN:".into()
}

pub fn confirm_purchase(
    amount: u64,
    kind: PurchaseKind,
    recipient: Option<&str>,
    calculation: Option<&Calculation>,
) -> String {
    let target = recipient.map(|r| format!(" for {}", r)).unwrap_or_default();
    let summary = match (kind, calculation) {
        (PurchaseKind::WalletLoad, Some(calc)) => format!(
            "Confirm {}{}: get {:.4} {} @ {:.2} ({})",
            naira(amount),
            target,
            calc.crypto_amount,
            quote_label(&calc.asset),
            calc.rate,
            quote_label(&calc.source)
        ),
        _ => format!("Confirm {} {}{}", naira(amount), kind.label(), target),
    };
    format!("{}\n1. Confirm\n2. Cancel", summary)
}

/// Ledger-supplied labels are bounded so the options always fit.
fn quote_label(text: &str) -> String {
    text.chars().take(QUOTE_LABEL_CHARS).collect()
}

pub fn purchase_complete(amount: u64, kind: PurchaseKind, signature: &str) -> String {
    let reference: String = signature.chars().take(10).collect();
    format!(
        "Success! {} {} completed. Ref: {}",
        naira(amount),
        kind.label(),
        reference
    )
}

pub fn purchase_cancelled() -> String {
    "Purchase cancelled. You have not been charged.".into()
}

pub fn purchase_failed(reason: &str) -> String {
    format!("Transaction failed: {}. You have not been charged.", reason)
}

pub fn rate_unavailable() -> String {
    "Rates are unavailable right now. Please try again later.".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FEATURE_PHONE_MAX_MESSAGE_LENGTH;

    #[test]
    fn test_naira_grouping() {
        assert_eq!(naira(0), "N0");
        assert_eq!(naira(100), "N100");
        assert_eq!(naira(1_000), "N1,000");
        assert_eq!(naira(500_000), "N500,000");
        assert_eq!(naira(1_234_567), "N1,234,567");
    }

    #[test]
    fn test_rate_limited_rounds_up_to_minutes() {
        assert_eq!(rate_limited(30), "Too many attempts. Try again in 1 min.");
        assert_eq!(rate_limited(61), "Too many attempts. Try again in 2 min.");
    }

    #[test]
    fn test_static_prompts_fit_feature_phone() {
        let prompts = [
            wallet_type_menu(),
            invalid_choice(&wallet_type_menu()),
            invalid_pin(&new_wallet_pin_prompt()),
            pin_mismatch(),
            linking_needs_smartphone(),
            service_menu(500_000, Some("08031234567")),
            purchase_cancelled(),
            link_pending("0123456789abcdef0123456789abcdef", Duration::from_secs(600)),
        ];
        for prompt in prompts {
            assert!(
                prompt.chars().count() <= FEATURE_PHONE_MAX_MESSAGE_LENGTH,
                "too long: {prompt}"
            );
        }
    }

    #[test]
    fn test_confirm_wallet_load_shows_quote() {
        let calc = Calculation {
            rate: 1_550.0,
            asset: "USDC".into(),
            source: "dex".into(),
            crypto_amount: 1_000.0 / 1_550.0,
        };
        let msg = confirm_purchase(1_000, PurchaseKind::WalletLoad, None, Some(&calc));
        assert!(msg.contains("0.6452 USDC"));
        assert!(msg.ends_with("1. Confirm\n2. Cancel"));
    }

    #[test]
    fn test_confirm_keeps_options_with_long_rate_source() {
        let calc = Calculation {
            rate: 1_550.0,
            asset: "USDC".into(),
            source: "aggregated-liquidity-".repeat(20),
            crypto_amount: 500_000.0 / 1_550.0,
        };
        let msg = confirm_purchase(
            500_000,
            PurchaseKind::WalletLoad,
            Some("07031234567"),
            Some(&calc),
        );
        assert!(msg.chars().count() <= FEATURE_PHONE_MAX_MESSAGE_LENGTH);
        assert!(msg.contains("(aggregated-l)"));
        assert!(msg.ends_with("1. Confirm\n2. Cancel"));
    }

    #[test]
    fn test_confirm_airtime() {
        let msg = confirm_purchase(500, PurchaseKind::Airtime, Some("07031234567"), None);
        assert!(msg.starts_with("Confirm N500 airtime for 07031234567"));
    }
}
