//! Fixed-window rate limiting.
//!
//! Each key gets a counter and a reset instant. The first request of a
//! window (or the first after `reset_at`) starts a fresh window with
//! `count = 1`; later requests increment. Exactly `max` requests succeed
//! per window.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::audit::{AuditCategory, AuditEntry, AuditLevel, AuditTrail};
use crate::clock::SharedClock;
use crate::config::RatePolicyConfig;
use crate::security::request::RequestDescriptor;

/// A named fixed-window policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePolicy {
    pub name: &'static str,
    pub window: Duration,
    pub max: u32,
    /// Refund the request if the downstream response succeeds.
    pub skip_successful: bool,
}

impl RatePolicy {
    /// Loose limit for the whole API: 100 requests per 15 minutes.
    pub fn general() -> Self {
        Self {
            name: "general",
            window: Duration::minutes(15),
            max: 100,
            skip_successful: false,
        }
    }

    /// Mutating and sensitive endpoints: 10 requests per minute.
    pub fn strict() -> Self {
        Self {
            name: "strict",
            window: Duration::seconds(60),
            max: 10,
            skip_successful: false,
        }
    }

    /// Login: 5 failed attempts per 15 minutes; successes are refunded.
    pub fn login() -> Self {
        Self {
            name: "login",
            window: Duration::minutes(15),
            max: 5,
            skip_successful: true,
        }
    }

    pub fn from_config(name: &'static str, config: &RatePolicyConfig) -> Self {
        Self {
            name,
            window: Duration::seconds(config.window_secs as i64),
            max: config.max_requests,
            skip_successful: config.skip_successful,
        }
    }

    /// Window key for a client on a route under this policy.
    pub fn key(&self, client_ip: &str, route: &str) -> String {
        format!("{}:{}:{}", self.name, client_ip, route)
    }
}

/// Outcome of a single check, including response metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window resets; set on denials only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl RateDecision {
    /// Whole seconds until reset, rounded up.
    pub fn reset_in_secs(&self, now: DateTime<Utc>) -> u64 {
        seconds_until(self.reset_at, now)
    }
}

fn seconds_until(at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}

#[derive(Debug, Clone)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    clock: SharedClock,
    audit: Arc<AuditTrail>,
}

impl RateLimiter {
    pub fn new(clock: SharedClock, audit: Arc<AuditTrail>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            audit,
        }
    }

    /// Count one request against `key` and decide.
    pub fn check(&self, key: &str, window: Duration, max: u32) -> RateDecision {
        let now = self.clock.now();
        let (count, reset_at) = {
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| RateWindow {
                    count: 0,
                    reset_at: now + window,
                });
            if now >= entry.reset_at {
                *entry = RateWindow {
                    count: 0,
                    reset_at: now + window,
                };
            }
            entry.count = entry.count.saturating_add(1);
            (entry.count, entry.reset_at)
        };

        let allowed = count <= max;
        RateDecision {
            allowed,
            limit: max,
            remaining: max.saturating_sub(count),
            reset_at,
            retry_after_secs: (!allowed).then(|| seconds_until(reset_at, now).max(1)),
        }
    }

    /// Apply `policy` to a request, auditing denials.
    pub fn check_request(&self, policy: &RatePolicy, request: &RequestDescriptor) -> (String, RateDecision) {
        let key = policy.key(&request.client_ip, &request.route());
        let decision = self.check(&key, policy.window, policy.max);

        if !decision.allowed {
            tracing::warn!(
                client = %request.client_ip,
                path = %request.path,
                policy = policy.name,
                limit = policy.max,
                "Rate limit exceeded"
            );
            self.audit.record(
                AuditEntry::new(AuditLevel::Warn, AuditCategory::RateLimit, "rate_limit_exceeded")
                    .source(&request.client_ip)
                    .method(&request.method)
                    .resource(&request.path)
                    .user_agent(request.user_agent())
                    .status(429)
                    .details(json!({
                        "policy": policy.name,
                        "limit": policy.max,
                        "windowSecs": policy.window.num_seconds(),
                        "retryAfterSecs": decision.retry_after_secs,
                    })),
            );
        }
        (key, decision)
    }

    /// Undo one counted request, for policies that skip successful
    /// responses. No-op once the window has rolled over.
    pub fn release(&self, key: &str) {
        let now = self.clock.now();
        if let Some(mut entry) = self.windows.get_mut(key) {
            if now < entry.reset_at {
                entry.count = entry.count.saturating_sub(1);
            }
        }
    }

    /// Drop expired windows. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, w| now < w.reset_at);
        before.saturating_sub(self.windows.len())
    }

    /// Number of live keys.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
