//! Per-key rate limiting.
//!
//! Each operation class has its own fixed-origin window: the counter resets
//! once `now - window_start` exceeds the window length, otherwise it grows
//! until the threshold is hit. Counters are keyed by `(class, identifier)`
//! where the identifier is a phone number or a client IP.
//!
//! Two counting modes exist:
//!
//! - **Every call** (general, session start, registration, transaction):
//!   [`RateLimiter::check`] increments and compares.
//! - **Failures only** (PIN): `check` only compares; callers report bad
//!   attempts with [`RateLimiter::record_failure`] and clear the slate with
//!   [`RateLimiter::reset`] after a success.

use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::config::{RateLimitConfig, RateLimitRule};

/// The classes of operation that carry independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    General,
    SessionStart,
    Pin,
    Registration,
    Transaction,
}

impl OperationClass {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::SessionStart => "session_start",
            Self::Pin => "pin",
            Self::Registration => "registration",
            Self::Transaction => "transaction",
        }
    }

    /// Whether only explicitly recorded failures count against the limit.
    pub fn counts_failures_only(self) -> bool {
        matches!(self, Self::Pin)
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a key has exhausted its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{class} limit exceeded, retry after {retry_after_secs}s")]
pub struct RateLimited {
    pub class: OperationClass,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    hits: u32,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self {
            started_at: now,
            hits: 0,
        }
    }

    fn roll_if_elapsed(&mut self, now: Instant, length: Duration) {
        if now.duration_since(self.started_at) > length {
            *self = Self::fresh(now);
        }
    }

    fn retry_after(&self, now: Instant, length: Duration) -> u64 {
        let remaining = length.saturating_sub(now.duration_since(self.started_at));
        (remaining.as_secs_f64().ceil() as u64).max(1)
    }
}

/// Concurrent per-key rate limiter.
///
/// Backed by a sharded map, so unrelated keys never contend on one lock.
pub struct RateLimiter {
    windows: DashMap<(OperationClass, String), Window>,
    rules: RateLimitConfig,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_keys", &self.windows.len())
            .field("rules", &self.rules)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(rules: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            rules,
        }
    }

    /// The rule governing `class`.
    pub fn rule(&self, class: OperationClass) -> RateLimitRule {
        match class {
            OperationClass::General => self.rules.general,
            OperationClass::SessionStart => self.rules.session_start,
            OperationClass::Pin => self.rules.pin,
            OperationClass::Registration => self.rules.registration,
            OperationClass::Transaction => self.rules.transaction,
        }
    }

    /// Consult (and for every-call classes, consume) the limit for `key`.
    pub fn check(&self, class: OperationClass, key: &str) -> Result<(), RateLimited> {
        let rule = self.rule(class);
        let now = Instant::now();

        if class.counts_failures_only() {
            let Some(mut window) = self.windows.get_mut(&(class, key.to_string())) else {
                return Ok(());
            };
            window.roll_if_elapsed(now, rule.window);
            if window.hits >= rule.max_hits {
                return Err(RateLimited {
                    class,
                    retry_after_secs: window.retry_after(now, rule.window),
                });
            }
            return Ok(());
        }

        let mut window = self
            .windows
            .entry((class, key.to_string()))
            .or_insert_with(|| Window::fresh(now));
        window.roll_if_elapsed(now, rule.window);
        window.hits = window.hits.saturating_add(1);
        if window.hits > rule.max_hits {
            tracing::debug!(class = %class, hits = window.hits, "rate limit hit");
            return Err(RateLimited {
                class,
                retry_after_secs: window.retry_after(now, rule.window),
            });
        }
        Ok(())
    }

    /// Count one failed attempt against `key`.
    pub fn record_failure(&self, class: OperationClass, key: &str) {
        let rule = self.rule(class);
        let now = Instant::now();
        let mut window = self
            .windows
            .entry((class, key.to_string()))
            .or_insert_with(|| Window::fresh(now));
        window.roll_if_elapsed(now, rule.window);
        window.hits = window.hits.saturating_add(1);
    }

    /// Forget all history for `key` in `class`.
    pub fn reset(&self, class: OperationClass, key: &str) {
        self.windows.remove(&(class, key.to_string()));
    }

    /// Drop counters whose window has fully elapsed. Returns how many went.
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|(class, _), window| now.duration_since(window.started_at) <= self.rule(*class).window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked `(class, key)` pairs.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop every counter.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_hits: u32, window: Duration) -> RateLimiter {
        let rule = RateLimitRule::new(max_hits, window);
        RateLimiter::new(RateLimitConfig {
            general: rule,
            session_start: rule,
            pin: rule,
            registration: rule,
            transaction: rule,
        })
    }

    #[test]
    fn test_every_call_class_blocks_after_threshold() {
        let rl = limiter(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(rl.check(OperationClass::SessionStart, "0803").is_ok());
        }
        let err = rl.check(OperationClass::SessionStart, "0803").unwrap_err();
        assert_eq!(err.class, OperationClass::SessionStart);
        assert!(err.retry_after_secs >= 1 && err.retry_after_secs <= 60);
    }

    #[test]
    fn test_keys_are_independent() {
        let rl = limiter(1, Duration::from_secs(60));
        assert!(rl.check(OperationClass::Transaction, "a").is_ok());
        assert!(rl.check(OperationClass::Transaction, "a").is_err());
        assert!(rl.check(OperationClass::Transaction, "b").is_ok());
        // Same key, different class.
        assert!(rl.check(OperationClass::Registration, "a").is_ok());
    }

    #[test]
    fn test_pin_counts_only_failures() {
        let rl = limiter(2, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(rl.check(OperationClass::Pin, "0803").is_ok());
        }
        rl.record_failure(OperationClass::Pin, "0803");
        assert!(rl.check(OperationClass::Pin, "0803").is_ok());
        rl.record_failure(OperationClass::Pin, "0803");
        assert!(rl.check(OperationClass::Pin, "0803").is_err());

        rl.reset(OperationClass::Pin, "0803");
        assert!(rl.check(OperationClass::Pin, "0803").is_ok());
    }

    #[test]
    fn test_window_rolls_over() {
        let rl = limiter(1, Duration::from_millis(30));
        assert!(rl.check(OperationClass::General, "10.0.0.1").is_ok());
        assert!(rl.check(OperationClass::General, "10.0.0.1").is_err());
        std::thread::sleep(Duration::from_millis(50));
        assert!(rl.check(OperationClass::General, "10.0.0.1").is_ok());
    }

    #[test]
    fn test_purge_stale() {
        let rl = limiter(5, Duration::from_millis(20));
        rl.check(OperationClass::General, "x").unwrap();
        rl.record_failure(OperationClass::Pin, "y");
        assert_eq!(rl.tracked_keys(), 2);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(rl.purge_stale(), 2);
        assert_eq!(rl.tracked_keys(), 0);
    }

    #[test]
    fn test_default_rules() {
        let rl = RateLimiter::new(RateLimitConfig::default());
        assert_eq!(rl.rule(OperationClass::Pin).max_hits, 5);
        assert_eq!(rl.rule(OperationClass::Registration).max_hits, 3);
        assert_eq!(rl.rule(OperationClass::General).max_hits, 100);
    }
}
