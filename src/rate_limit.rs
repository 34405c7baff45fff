//! Admission control in front of sensitive endpoints.
//!
//! Fixed-window request counters per client network identity. A limited
//! request is answered before any session, provider, or disk work happens,
//! so the cost of abuse is bounded up front.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Stale windows are pruned once the table grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Login,
    MfaVerify,
    RecordDownload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
}

/// Limiter that admits everything; used in tests.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct FixedWindowRateLimiter {
    window: Duration,
    login_limit: u32,
    mfa_limit: u32,
    record_limit: u32,
    windows: Mutex<HashMap<(RateLimitAction, String), Window>>,
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: Duration::from_secs(60),
            login_limit: 10,
            mfa_limit: 10,
            record_limit: 120,
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, action: RateLimitAction, limit: u32) -> Self {
        match action {
            RateLimitAction::Login => self.login_limit = limit,
            RateLimitAction::MfaVerify => self.mfa_limit = limit,
            RateLimitAction::RecordDownload => self.record_limit = limit,
        }
        self
    }

    const fn limit_for(&self, action: RateLimitAction) -> u32 {
        match action {
            RateLimitAction::Login => self.login_limit,
            RateLimitAction::MfaVerify => self.mfa_limit,
            RateLimitAction::RecordDownload => self.record_limit,
        }
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        // Requests without a resolvable client identity share one bucket.
        let key = (action, ip.unwrap_or("unknown").to_string());
        let limit = self.limit_for(action);
        let now = Instant::now();

        let Ok(mut windows) = self.windows.lock() else {
            return RateLimitDecision::Allowed;
        };
        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, entry| now.duration_since(entry.started) < window);
        }

        let entry = windows.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= limit {
            return RateLimitDecision::Limited;
        }
        entry.count += 1;
        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn fixed_window_limits_after_threshold() {
        let limiter = FixedWindowRateLimiter::new().with_limit(RateLimitAction::Login, 3);
        for _ in 0..3 {
            assert_eq!(
                limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn buckets_are_per_ip_and_action() {
        let limiter = FixedWindowRateLimiter::new()
            .with_limit(RateLimitAction::Login, 1)
            .with_limit(RateLimitAction::MfaVerify, 1);

        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
        // A different client and a different action are unaffected.
        assert_eq!(
            limiter.check_ip(Some("5.6.7.8"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::MfaVerify),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn window_resets_after_elapsing() {
        let limiter = FixedWindowRateLimiter::new()
            .with_window(Duration::ZERO)
            .with_limit(RateLimitAction::RecordDownload, 1);
        // A zero-length window restarts on every check.
        for _ in 0..5 {
            assert_eq!(
                limiter.check_ip(Some("1.2.3.4"), RateLimitAction::RecordDownload),
                RateLimitDecision::Allowed
            );
        }
    }
}
