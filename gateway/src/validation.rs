//! Input validation for everything that arrives over the wire: session ids,
//! phone numbers, PINs and purchase amounts.
//!
//! Phone numbers are canonicalised to the 11-digit local format
//! (`08031234567`). International forms (`+2348031234567`,
//! `2348031234567`) are accepted and rewritten.

use crate::config::{MAX_SESSION_ID_LENGTH, MIN_SESSION_ID_LENGTH, PIN_MAX_LENGTH, PIN_MIN_LENGTH};

/// Country calling code stripped from international numbers.
const COUNTRY_CODE: &str = "234";

/// Digits in a canonical local number, leading zero included.
const LOCAL_NUMBER_LENGTH: usize = 11;

/// Returns `true` if `id` matches `^[A-Za-z0-9_-]{8,128}$`.
pub fn is_valid_session_id(id: &str) -> bool {
    (MIN_SESSION_ID_LENGTH..=MAX_SESSION_ID_LENGTH).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Canonicalise a phone number to local format, or `None` if it is not a
/// plausible mobile number.
///
/// Spaces, dashes and parentheses are ignored. Local numbers must start
/// with `0` followed by a `7`, `8` or `9` network prefix.
pub fn normalize_phone_number(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let local = match digits.strip_prefix(COUNTRY_CODE) {
        Some(rest) if rest.len() == LOCAL_NUMBER_LENGTH - 1 => format!("0{}", rest),
        _ => digits.to_string(),
    };

    let bytes = local.as_bytes();
    let plausible = local.len() == LOCAL_NUMBER_LENGTH
        && bytes[0] == b'0'
        && matches!(bytes[1], b'7' | b'8' | b'9');
    plausible.then_some(local)
}

/// Returns `true` if `pin` is 4-6 ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    (PIN_MIN_LENGTH..=PIN_MAX_LENGTH).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Returns `true` if `amount` lies within `[min, max]`.
pub fn is_valid_amount(amount: u64, min: u64, max: u64) -> bool {
    (min..=max).contains(&amount)
}

/// Mask a phone number for logs: first four and last three digits survive.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 7 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 7), tail)
}
