//! Fixed-window request counting per caller key.
//!
//! Keys are a composite of network address and agent id. A window opens on
//! the first request (or the first request after the previous window's
//! reset) with `count = 1`; every further request in the window increments.
//! Rollover and increment happen under one lock acquisition, so two
//! concurrent requests can never both open "the first" window or lose an
//! increment at a window boundary.
//!
//! Fixed windows admit up to `2 x limit` across a boundary. That is a
//! deliberate, documented trade-off: the guarantee here is bounded abuse,
//! not precise fairness. Swapping in a sliding window would change
//! externally observable admission behavior, so don't do it silently.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

/// Default policy: 100 requests per 60-second window per key.
pub const DEFAULT_LIMIT: u32 = 100;
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Sweep fully expired entries once the table grows past this.
const SWEEP_THRESHOLD: usize = 4096;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests observed in the current window, this one included.
    pub count: u32,
    pub limit: u32,
    pub window_reset_at: DateTime<Utc>,
}

impl RateDecision {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_reset_at: DateTime<Utc>,
}

/// Shared fixed-window counter table.
///
/// Constructed once and injected wherever admission decisions are made;
/// never a module-level singleton, so a distributed backing store can
/// replace it without touching call sites.
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, WindowEntry>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: StdDuration) -> Self {
        Self {
            limit,
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(60)),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_LIMIT, StdDuration::from_secs(DEFAULT_WINDOW_SECS))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Admit or reject one request for `key` under the limiter's own policy.
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Utc::now())
    }

    /// Same as [`check`](Self::check) but with an explicit per-call policy.
    /// Used for action-scoped quotas layered on top of the transport limit.
    pub fn check_with(&self, key: &str, limit: u32, window: StdDuration) -> RateDecision {
        let window = Duration::from_std(window).unwrap_or(self.window);
        self.admit(key, limit, window, Utc::now())
    }

    fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateDecision {
        self.admit(key, self.limit, self.window, now)
    }

    fn admit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() >= SWEEP_THRESHOLD {
            windows.retain(|_, entry| entry.window_reset_at > now);
        }

        let entry = windows
            .entry(key.to_string())
            .and_modify(|entry| {
                if now > entry.window_reset_at {
                    entry.count = 1;
                    entry.window_reset_at = now + window;
                } else {
                    entry.count = entry.count.saturating_add(1);
                }
            })
            .or_insert(WindowEntry {
                count: 1,
                window_reset_at: now + window,
            });

        RateDecision {
            allowed: entry.count <= limit,
            count: entry.count,
            limit,
            window_reset_at: entry.window_reset_at,
        }
    }
}

/// Composite limiter key: network address plus declared agent id.
pub fn composite_key(client_ip: &str, agent_id: Option<&str>) -> String {
    format!("{client_ip}:{}", agent_id.unwrap_or("anonymous"))
}
