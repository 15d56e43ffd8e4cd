// Fixed-window admission control for the API routes.
//
// Each (policy, identifier) pair owns a window that opens on its first
// request and lasts `window_secs`. Up to `limit` requests are admitted per
// window; the window restarts on the first request after it closes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use marketlens_core::config::{RateLimitPolicy, RateLimitsConfig};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window closes.
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    /// Unix timestamp (seconds) of `reset_at`, as sent in `X-RateLimit-Reset`.
    pub fn reset_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }

    /// Whole seconds until the window closes, rounded up, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.reset_at - now).num_milliseconds();
        ((millis + 999) / 1000).max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: DateTime<Utc>,
    count: u32,
}

/// A single named policy and its per-identifier windows.
pub struct RateLimiter {
    name: &'static str,
    policy: RateLimitPolicy,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, policy: RateLimitPolicy) -> Self {
        Self {
            name,
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    fn window_len(&self) -> Duration {
        let secs = i64::try_from(self.policy.window_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.windows.lock().expect("rate limiter mutex poisoned")
    }

    /// Count one request from `identifier` against the policy.
    pub fn check(&self, identifier: &str) -> Decision {
        self.check_at(identifier, Utc::now())
    }

    /// [`check`](Self::check) with an explicit clock.
    pub fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> Decision {
        let window_len = self.window_len();
        let limit = self.policy.limit;

        let mut windows = self.windows();
        let window = windows
            .entry(identifier.to_string())
            .or_insert(Window {
                start: now,
                count: 0,
            });

        if now >= closes_at(window.start, window_len) {
            *window = Window {
                start: now,
                count: 0,
            };
        }

        let reset_at = closes_at(window.start, window_len);
        let decision = if window.count < limit {
            window.count += 1;
            Decision {
                allowed: true,
                limit,
                remaining: limit - window.count,
                reset_at,
            }
        } else {
            Decision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
            }
        };

        if !decision.allowed {
            debug!(policy = self.name, identifier, "rate limit exceeded");
        }
        decision
    }

    /// Drop windows that closed at or before `now`. Returns how many were
    /// removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let window_len = self.window_len();
        let mut windows = self.windows();
        let before = windows.len();
        windows.retain(|_, w| closes_at(w.start, window_len) > now);
        before - windows.len()
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows().len()
    }
}

/// End of a window. A window too long to represent never closes.
fn closes_at(start: DateTime<Utc>, len: Duration) -> DateTime<Utc> {
    start.checked_add_signed(len).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The named policies used by the API routes.
pub struct RateLimiters {
    pub quotes: RateLimiter,
    pub ai: RateLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        Self {
            quotes: RateLimiter::new("quotes", config.quotes),
            ai: RateLimiter::new("ai", config.ai),
        }
    }

    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        self.quotes.prune(now) + self.ai.prune(now)
    }
}
