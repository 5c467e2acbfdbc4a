//! Brute-force lockout for authentication attempts.
//!
//! # States (per key, per namespace)
//! ```text
//! Clean   : no record, or last failure older than the attempt window
//! Warming : record with count < max_attempts
//! Locked  : count >= max_attempts and now < locked_until
//! ```
//!
//! # Transitions
//! ```text
//! Clean   → Warming : failure (count = 1)
//! Warming → Warming : failure (count += 1)
//! Warming → Locked  : failure reaching max_attempts (locked_until = now + lockout)
//! Locked  → Locked  : failure is rejected; count and locked_until untouched
//! Locked  → Clean   : first check after locked_until (lazy)
//! any     → Clean   : successful login
//! ```
//!
//! IP addresses and login identifiers are tracked in separate maps and a
//! login must clear both.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::audit::{AuditCategory, AuditEntry, AuditLevel, AuditTrail};
use crate::clock::SharedClock;
use crate::config::LockoutConfig;
use crate::observability::metrics;

/// Trimmed, lowercased login identifier.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttemptKey {
    Ip(String),
    Identifier(String),
}

impl AttemptKey {
    pub fn ip(ip: &str) -> Self {
        AttemptKey::Ip(ip.to_string())
    }

    pub fn identifier(raw: &str) -> Self {
        AttemptKey::Identifier(normalize_identifier(raw))
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            AttemptKey::Ip(_) => "ip",
            AttemptKey::Identifier(_) => "identifier",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            AttemptKey::Ip(v) | AttemptKey::Identifier(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub locked: bool,
    pub remaining_seconds: u64,
}

impl LockStatus {
    const OPEN: LockStatus = LockStatus {
        locked: false,
        remaining_seconds: 0,
    };

    fn until(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let millis = (locked_until - now).num_milliseconds().max(0) as u64;
        LockStatus {
            locked: true,
            remaining_seconds: millis.div_ceil(1000).max(1),
        }
    }

    /// The more restrictive of two statuses.
    fn merge(self, other: LockStatus) -> LockStatus {
        if other.locked && (!self.locked || other.remaining_seconds > self.remaining_seconds) {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutStats {
    #[serde(rename = "blockedIPCount")]
    pub blocked_ip_count: usize,
    pub blocked_identifier_count: usize,
    pub total_tracked_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutSettings {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
    pub attempt_window: Duration,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self::from(&LockoutConfig::default())
    }
}

impl From<&LockoutConfig> for LockoutSettings {
    fn from(config: &LockoutConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            lockout_duration: Duration::seconds(config.lockout_secs as i64),
            attempt_window: Duration::seconds(config.attempt_window_secs as i64),
        }
    }
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    count: u32,
    last_attempt_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

pub struct LockoutGuard {
    by_ip: DashMap<String, AttemptRecord>,
    by_identifier: DashMap<String, AttemptRecord>,
    settings: LockoutSettings,
    clock: SharedClock,
    audit: Arc<AuditTrail>,
}

impl LockoutGuard {
    pub fn new(settings: LockoutSettings, clock: SharedClock, audit: Arc<AuditTrail>) -> Self {
        Self {
            by_ip: DashMap::new(),
            by_identifier: DashMap::new(),
            settings,
            clock,
            audit,
        }
    }

    pub fn settings(&self) -> &LockoutSettings {
        &self.settings
    }

    fn map(&self, key: &AttemptKey) -> &DashMap<String, AttemptRecord> {
        match key {
            AttemptKey::Ip(_) => &self.by_ip,
            AttemptKey::Identifier(_) => &self.by_identifier,
        }
    }

    /// Current lock state. An expired lock is evicted here.
    pub fn is_locked(&self, key: &AttemptKey) -> LockStatus {
        let now = self.clock.now();
        let map = self.map(key);

        let expired = match map.get(key.value()) {
            None => return LockStatus::OPEN,
            Some(record) => match record.locked_until {
                Some(until) if now < until => return LockStatus::until(until, now),
                Some(_) => true,
                None => false,
            },
        };
        if expired {
            map.remove_if(key.value(), |_, r| r.locked_until.is_some_and(|u| now >= u));
            tracing::debug!(namespace = key.namespace(), "Lockout expired");
        }
        LockStatus::OPEN
    }

    /// Count a failed attempt. Attempts against a locked key change nothing.
    pub fn record_failure(&self, key: &AttemptKey, source: &str) -> LockStatus {
        let now = self.clock.now();
        let settings = self.settings;

        let (count, status, newly_locked) = {
            let mut record = self
                .map(key)
                .entry(key.value().to_string())
                .or_insert_with(|| AttemptRecord {
                    count: 0,
                    last_attempt_at: now,
                    locked_until: None,
                });

            let locked_until = record.locked_until;
            match locked_until {
                Some(until) if now < until => {
                    tracing::debug!(namespace = key.namespace(), "Attempt while locked ignored");
                    return LockStatus::until(until, now);
                }
                Some(_) => {
                    record.count = 0;
                    record.locked_until = None;
                }
                None => {
                    if now - record.last_attempt_at > settings.attempt_window {
                        record.count = 0;
                    }
                }
            }

            record.count += 1;
            record.last_attempt_at = now;
            if record.count >= settings.max_attempts {
                let until = now + settings.lockout_duration;
                record.locked_until = Some(until);
                (record.count, LockStatus::until(until, now), true)
            } else {
                (record.count, LockStatus::OPEN, false)
            }
        };

        self.audit.record(
            self.entry(AuditLevel::Warn, AuditCategory::Authentication, "login_failed", key, source)
                .details(json!({
                    "namespace": key.namespace(),
                    "attempts": count,
                    "maxAttempts": settings.max_attempts,
                })),
        );

        if newly_locked {
            metrics::record_lockout(key.namespace());
            tracing::warn!(
                namespace = key.namespace(),
                source,
                attempts = count,
                lockout_secs = settings.lockout_duration.num_seconds(),
                "Lockout engaged"
            );
            self.audit.record(
                self.entry(AuditLevel::Warn, AuditCategory::Security, "account_locked", key, source)
                    .details(json!({
                        "namespace": key.namespace(),
                        "attempts": count,
                        "lockoutSecs": settings.lockout_duration.num_seconds(),
                    })),
            );
        }
        status
    }

    /// Clear a key. Returns whether a record existed.
    pub fn clear(&self, key: &AttemptKey) -> bool {
        self.map(key).remove(key.value()).is_some()
    }

    /// Lock state for a login, IP first, then identifier. Blocks are audited.
    pub fn check_login(&self, ip: &str, identifier: Option<&str>) -> LockStatus {
        let ip_key = AttemptKey::ip(ip);
        let mut status = self.is_locked(&ip_key);
        let mut blocked_by = status.locked.then_some("ip");

        if let Some(identifier) = identifier {
            let id_status = self.is_locked(&AttemptKey::identifier(identifier));
            if id_status.locked && blocked_by.is_none() {
                blocked_by = Some("identifier");
            }
            status = status.merge(id_status);
        }

        if let Some(namespace) = blocked_by {
            self.audit.record(
                AuditEntry::new(AuditLevel::Warn, AuditCategory::Security, "login_blocked")
                    .source(ip)
                    .actor(None, identifier.map(normalize_identifier).as_deref())
                    .status(423)
                    .details(json!({
                        "namespace": namespace,
                        "remainingSeconds": status.remaining_seconds,
                    })),
            );
        }
        status
    }

    /// Count a failed login against both namespaces.
    pub fn record_login_failure(&self, ip: &str, identifier: Option<&str>) -> LockStatus {
        let status = self.record_failure(&AttemptKey::ip(ip), ip);
        match identifier {
            Some(id) => status.merge(self.record_failure(&AttemptKey::identifier(id), ip)),
            None => status,
        }
    }

    /// A successful login resets both namespaces.
    pub fn record_success(&self, ip: &str, identifier: Option<&str>) {
        self.clear(&AttemptKey::ip(ip));
        let normalized = identifier.map(normalize_identifier);
        if let Some(id) = &normalized {
            self.by_identifier.remove(id);
        }
        self.audit.record(
            AuditEntry::new(AuditLevel::Info, AuditCategory::Authentication, "login_succeeded")
                .source(ip)
                .actor(None, normalized.as_deref()),
        );
    }

    pub fn stats(&self) -> LockoutStats {
        let now = self.clock.now();
        let locked = |map: &DashMap<String, AttemptRecord>| {
            map.iter()
                .filter(|r| r.locked_until.is_some_and(|u| now < u))
                .count()
        };
        LockoutStats {
            blocked_ip_count: locked(&self.by_ip),
            blocked_identifier_count: locked(&self.by_identifier),
            total_tracked_count: self.by_ip.len() + self.by_identifier.len(),
        }
    }

    /// Drop stale unlocked records and expired locks. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let window = self.settings.attempt_window;
        let keep = |_: &String, r: &mut AttemptRecord| match r.locked_until {
            Some(until) => now < until,
            None => now - r.last_attempt_at <= window,
        };

        let before = self.by_ip.len() + self.by_identifier.len();
        self.by_ip.retain(keep);
        self.by_identifier.retain(keep);
        before.saturating_sub(self.by_ip.len() + self.by_identifier.len())
    }

    fn entry(
        &self,
        level: AuditLevel,
        category: AuditCategory,
        action: &str,
        key: &AttemptKey,
        source: &str,
    ) -> AuditEntry {
        let entry = AuditEntry::new(level, category, action).source(source);
        match key {
            AttemptKey::Identifier(id) => entry.actor(None, Some(id)),
            AttemptKey::Ip(_) => entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditFilter, Masker};
    use crate::clock::ManualClock;

    fn guard() -> (LockoutGuard, ManualClock, Arc<AuditTrail>) {
        let clock = ManualClock::default();
        let shared: SharedClock = Arc::new(clock.clone());
        let audit = Arc::new(AuditTrail::new(1000, Masker::default(), shared.clone()));
        let guard = LockoutGuard::new(LockoutSettings::default(), shared, audit.clone());
        (guard, clock, audit)
    }

    #[test]
    fn test_locks_after_max_attempts() {
        let (guard, _, _) = guard();
        let key = AttemptKey::identifier("user@example.com");

        for _ in 0..4 {
            assert!(!guard.record_failure(&key, "10.0.0.1").locked);
            assert!(!guard.is_locked(&key).locked);
        }
        let status = guard.record_failure(&key, "10.0.0.1");
        assert!(status.locked);
        assert_eq!(status.remaining_seconds, 15 * 60);

        let checked = guard.is_locked(&key);
        assert!(checked.locked);
        assert!(checked.remaining_seconds > 0);
    }

    #[test]
    fn test_success_resets_count() {
        let (guard, _, _) = guard();
        let ip = "203.0.113.5";
        for _ in 0..4 {
            guard.record_login_failure(ip, Some("user@example.com"));
        }
        guard.record_success(ip, Some("USER@example.com "));
        assert_eq!(guard.stats().total_tracked_count, 0);

        // A fresh failure starts from 1: four more are needed before locking
        for _ in 0..4 {
            assert!(!guard.record_login_failure(ip, Some("user@example.com")).locked);
        }
        assert!(guard.record_login_failure(ip, Some("user@example.com")).locked);
    }

    #[test]
    fn test_lock_not_extended_while_locked() {
        let (guard, clock, _) = guard();
        let key = AttemptKey::ip("198.51.100.7");
        for _ in 0..5 {
            guard.record_failure(&key, "198.51.100.7");
        }

        clock.advance(Duration::minutes(10));
        let status = guard.record_failure(&key, "198.51.100.7");
        assert!(status.locked);
        assert_eq!(status.remaining_seconds, 5 * 60);

        clock.advance(Duration::minutes(5));
        assert!(!guard.is_locked(&key).locked);
        // Lazy eviction removed the record
        assert_eq!(guard.stats().total_tracked_count, 0);

        // Next failure starts over
        assert!(!guard.record_failure(&key, "198.51.100.7").locked);
    }

    #[test]
    fn test_stale_record_resets() {
        let (guard, clock, _) = guard();
        let key = AttemptKey::ip("198.51.100.8");
        for _ in 0..4 {
            guard.record_failure(&key, "198.51.100.8");
        }
        clock.advance(Duration::minutes(16));

        // Older than the attempt window: counts as the first failure
        for _ in 0..4 {
            assert!(!guard.record_failure(&key, "198.51.100.8").locked);
        }
        assert!(guard.record_failure(&key, "198.51.100.8").locked);
    }

    #[test]
    fn test_identifier_lock_spans_ips() {
        let (guard, _, audit) = guard();
        let email = "user@example.com";
        for _ in 0..5 {
            guard.record_login_failure("10.0.0.1", Some(email));
        }

        let from_a = guard.check_login("10.0.0.1", Some(email));
        assert!(from_a.locked);
        assert!(from_a.remaining_seconds > 0);

        // Fresh IP, same identifier: still blocked by the identifier namespace
        assert!(!guard.is_locked(&AttemptKey::ip("10.0.0.2")).locked);
        let from_b = guard.check_login("10.0.0.2", Some(email));
        assert!(from_b.locked);

        // Fresh IP with a different identifier passes
        assert!(!guard.check_login("10.0.0.2", Some("other@example.com")).locked);

        let blocked = audit.query(&AuditFilter {
            category: Some(AuditCategory::Security),
            ..Default::default()
        });
        let actions: Vec<_> = blocked.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["login_blocked", "login_blocked", "account_locked", "account_locked"]
        );
        assert_eq!(blocked[0].details.as_ref().unwrap()["namespace"], "identifier");
        assert_eq!(blocked[1].details.as_ref().unwrap()["namespace"], "ip");
    }

    #[test]
    fn test_stats_and_sweep() {
        let (guard, clock, _) = guard();
        for _ in 0..5 {
            guard.record_login_failure("10.0.0.1", Some("a@example.com"));
        }
        guard.record_login_failure("10.0.0.9", Some("b@example.com"));

        assert_eq!(
            guard.stats(),
            LockoutStats {
                blocked_ip_count: 1,
                blocked_identifier_count: 1,
                total_tracked_count: 4,
            }
        );

        clock.advance(Duration::minutes(14));
        assert_eq!(guard.sweep(), 0);

        clock.advance(Duration::minutes(2));
        assert_eq!(guard.sweep(), 4);
        assert_eq!(guard.stats().total_tracked_count, 0);
    }

    #[test]
    fn test_failures_are_audited() {
        let (guard, _, audit) = guard();
        guard.record_login_failure("10.0.0.1", Some("Ana@Example.com"));
        guard.record_success("10.0.0.1", Some("ana@example.com"));

        let events = audit.query(&AuditFilter::default());
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].action, "login_succeeded");
        assert_eq!(events[0].level, AuditLevel::Info);
        assert_eq!(events[1].actor_email.as_deref(), Some("ana@example.com"));
        assert_eq!(events[2].level, AuditLevel::Warn);
        assert_eq!(events[2].source_address, "10.0.0.1");
    }
}
