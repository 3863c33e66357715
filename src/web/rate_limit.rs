//! Fixed-window request rate limiting for the management API.
//!
//! Three global categories with their own per-minute budgets. Counters live
//! in one mutex-guarded map; windows are aligned to wall-clock minutes so
//! the reset timestamp in the response headers is exact.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const WINDOW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateCategory {
    Read,
    Write,
    Trigger,
}

impl RateCategory {
    pub fn limit(&self) -> u32 {
        match self {
            RateCategory::Read => 100,
            RateCategory::Write => 30,
            RateCategory::Trigger => 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the current window ends.
    pub reset: i64,
}

#[derive(Debug, Default)]
struct Window {
    start: i64,
    count: u32,
}

#[derive(Clone, Default)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<RateCategory, Window>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, category: RateCategory) -> RateDecision {
        self.check_at(category, Utc::now().timestamp())
    }

    /// Window bookkeeping with an injectable clock for tests.
    pub fn check_at(&self, category: RateCategory, now: i64) -> RateDecision {
        let window_start = now - now.rem_euclid(WINDOW_SECONDS);
        let limit = category.limit();

        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let window = windows.entry(category).or_default();

        if window.start != window_start {
            window.start = window_start;
            window.count = 0;
        }

        let allowed = window.count < limit;
        if allowed {
            window.count += 1;
        }

        RateDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(window.count),
            reset: window_start + WINDOW_SECONDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhausts_within_window() {
        let limiter = RateLimiter::new();
        let now = 1_700_000_000;

        for _ in 0..RateCategory::Trigger.limit() {
            assert!(limiter.check_at(RateCategory::Trigger, now).allowed);
        }
        let denied = limiter.check_at(RateCategory::Trigger, now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn window_rolls_over() {
        let limiter = RateLimiter::new();
        let now = 1_700_000_000;

        for _ in 0..=RateCategory::Trigger.limit() {
            limiter.check_at(RateCategory::Trigger, now);
        }
        assert!(!limiter.check_at(RateCategory::Trigger, now).allowed);
        assert!(limiter.check_at(RateCategory::Trigger, now + WINDOW_SECONDS).allowed);
    }

    #[test]
    fn categories_have_independent_budgets() {
        let limiter = RateLimiter::new();
        let now = 1_700_000_000;

        for _ in 0..=RateCategory::Trigger.limit() {
            limiter.check_at(RateCategory::Trigger, now);
        }
        assert!(limiter.check_at(RateCategory::Read, now).allowed);
    }

    #[test]
    fn reset_is_window_end() {
        let limiter = RateLimiter::new();
        // 1_699_999_980 is the enclosing minute boundary
        let decision = limiter.check_at(RateCategory::Read, 1_700_000_030);
        assert_eq!(decision.reset, 1_699_999_980 + WINDOW_SECONDS);
    }
}
