//! Bounded in-memory audit trail.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::audit::event::{AuditCategory, AuditEntry, AuditEvent, AuditLevel};
use crate::audit::masking::Masker;
use crate::clock::SharedClock;
use crate::config::AuditConfig;
use crate::observability::metrics;

/// Filters accepted by [`AuditTrail::query`]. All present filters must match.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditFilter {
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub end: Option<DateTime<Utc>>,
    pub level: Option<AuditLevel>,
    pub category: Option<AuditCategory>,
    pub actor_id: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        if self.start.is_some_and(|start| event.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| event.timestamp > end) {
            return false;
        }
        if self.level.is_some_and(|level| event.level != level) {
            return false;
        }
        if self.category.is_some_and(|category| event.category != category) {
            return false;
        }
        match &self.actor_id {
            Some(actor) => event.actor_id.as_deref() == Some(actor.as_str()),
            None => true,
        }
    }
}

/// Counts over the retained events.
#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub total: usize,
    pub capacity: usize,
    pub by_level: BTreeMap<AuditLevel, usize>,
    pub by_category: BTreeMap<AuditCategory, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Append-only, capacity-bounded audit store.
///
/// The oldest event is evicted once `capacity` is exceeded; [`sweep`](Self::sweep)
/// additionally drops events past the retention age.
pub struct AuditTrail {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    masker: Masker,
    clock: SharedClock,
}

impl AuditTrail {
    pub fn new(capacity: usize, masker: Masker, clock: SharedClock) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            masker,
            clock,
        }
    }

    pub fn from_config(config: &AuditConfig, clock: SharedClock) -> Self {
        Self::new(config.capacity, Masker::new(&config.sensitive_keys), clock)
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<AuditEvent>> {
        // A panic while holding the lock cannot leave the deque half-written,
        // so a poisoned lock is still safe to use.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an event and return its id.
    pub fn record(&self, entry: AuditEntry) -> Uuid {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            timestamp: entry.timestamp.unwrap_or_else(|| self.clock.now()),
            level: entry.level,
            category: entry.category,
            action: entry.action,
            actor_id: entry.actor_id,
            actor_email: entry.actor_email,
            source_address: entry.source_address,
            user_agent: entry.user_agent,
            resource: entry.resource,
            method: entry.method,
            status_code: entry.status_code,
            details: entry.details.map(|d| self.masker.mask(d)),
            duration_ms: entry.duration_ms,
        };

        emit(&event);
        metrics::record_audit_event(event.level.as_str());

        let id = event.id;
        let mut events = self.events();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
        id
    }

    /// Matching events, most recent first.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        self.events()
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop every event older than `max_age_days`. Returns the number removed.
    pub fn sweep(&self, max_age_days: u32) -> usize {
        let cutoff = self.clock.now() - Duration::days(i64::from(max_age_days));
        let mut events = self.events();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        let removed = before - events.len();
        if removed > 0 {
            tracing::info!(removed, max_age_days, "Audit retention sweep");
        }
        removed
    }

    pub fn summary(&self) -> AuditSummary {
        let events = self.events();
        let mut by_level = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        for event in events.iter() {
            *by_level.entry(event.level).or_insert(0) += 1;
            *by_category.entry(event.category).or_insert(0) += 1;
        }
        AuditSummary {
            total: events.len(),
            capacity: self.capacity,
            by_level,
            by_category,
            oldest: events.front().map(|e| e.timestamp),
            newest: events.back().map(|e| e.timestamp),
        }
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Mirror the event onto the log stream. Info events stay in the trail only.
fn emit(event: &AuditEvent) {
    match event.level {
        AuditLevel::Critical | AuditLevel::Error => tracing::error!(
            target: "audit",
            id = %event.id,
            level = %event.level,
            category = %event.category,
            action = %event.action,
            source = %event.source_address,
            resource = ?event.resource,
            actor = ?event.actor_id,
            details = ?event.details,
            "Audit event"
        ),
        AuditLevel::Warn => tracing::warn!(
            target: "audit",
            id = %event.id,
            category = %event.category,
            action = %event.action,
            source = %event.source_address,
            resource = ?event.resource,
            actor = ?event.actor_id,
            details = ?event.details,
            "Audit event"
        ),
        AuditLevel::Info => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::masking::REDACTED;
    use crate::clock::{Clock, ManualClock};
    use serde_json::json;
    use std::sync::Arc;

    fn trail(capacity: usize) -> (AuditTrail, ManualClock) {
        let clock = ManualClock::default();
        let trail = AuditTrail::new(capacity, Masker::default(), Arc::new(clock.clone()));
        (trail, clock)
    }

    fn entry(action: &str) -> AuditEntry {
        AuditEntry::new(AuditLevel::Info, AuditCategory::System, action)
    }

    #[test]
    fn test_overflow_keeps_most_recent_in_order() {
        let (trail, _) = trail(5);
        for i in 0..12 {
            trail.record(entry(&format!("event-{i}")));
        }
        assert_eq!(trail.len(), 5);

        // Query returns most recent first
        let actions: Vec<_> = trail
            .query(&AuditFilter::default())
            .into_iter()
            .rev()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["event-7", "event-8", "event-9", "event-10", "event-11"]);
    }

    #[test]
    fn test_password_never_retained() {
        let (trail, _) = trail(10);
        trail.record(entry("login").details(json!({
            "email": "ana@example.com",
            "password": "S3cret!pass",
            "attempts": [{ "password": "other" }]
        })));

        let event = &trail.query(&AuditFilter::default())[0];
        let details = event.details.as_ref().unwrap();
        assert_eq!(details["password"], REDACTED);
        assert_eq!(details["attempts"][0]["password"], REDACTED);
        assert!(!details.to_string().contains("S3cret!pass"));
    }

    #[test]
    fn test_stamps_time_when_absent() {
        let (trail, clock) = trail(10);
        trail.record(entry("a"));
        let explicit = clock.now() - Duration::hours(3);
        trail.record(entry("b").at(explicit));

        let events = trail.query(&AuditFilter::default());
        assert_eq!(events[0].timestamp, explicit);
        assert_eq!(events[1].timestamp, clock.now());
    }

    #[test]
    fn test_query_filters() {
        let (trail, clock) = trail(100);
        let t0 = clock.now();
        trail.record(entry("boot"));
        clock.advance(Duration::minutes(1));
        trail.record(
            AuditEntry::new(AuditLevel::Warn, AuditCategory::Authentication, "login_failed")
                .actor(Some("u-1"), Some("ana@example.com")),
        );
        clock.advance(Duration::minutes(1));
        trail.record(
            AuditEntry::new(AuditLevel::Warn, AuditCategory::RateLimit, "rate_limit_exceeded"),
        );
        clock.advance(Duration::minutes(1));
        trail.record(
            AuditEntry::new(AuditLevel::Info, AuditCategory::Authentication, "login_succeeded")
                .actor(Some("u-1"), None),
        );

        let warn = trail.query(&AuditFilter {
            level: Some(AuditLevel::Warn),
            ..Default::default()
        });
        assert_eq!(warn.len(), 2);
        assert_eq!(warn[0].action, "rate_limit_exceeded");

        let auth = trail.query(&AuditFilter {
            category: Some(AuditCategory::Authentication),
            actor_id: Some("u-1".into()),
            ..Default::default()
        });
        assert_eq!(auth.len(), 2);
        assert_eq!(auth[0].action, "login_succeeded");

        // Inclusive range covering exactly the 2nd and 3rd events
        let ranged = trail.query(&AuditFilter {
            start: Some(t0 + Duration::minutes(1)),
            end: Some(t0 + Duration::minutes(2)),
            ..Default::default()
        });
        assert_eq!(ranged.len(), 2);

        let limited = trail.query(&AuditFilter {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].action, "login_succeeded");
    }

    #[test]
    fn test_retention_sweep() {
        let (trail, clock) = trail(100);
        trail.record(entry("old"));
        clock.advance(Duration::days(31));
        trail.record(entry("recent"));

        assert_eq!(trail.sweep(30), 1);
        let remaining = trail.query(&AuditFilter::default());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action, "recent");
        assert_eq!(trail.sweep(30), 0);
    }

    #[test]
    fn test_summary_counts() {
        let (trail, _) = trail(100);
        trail.record(entry("a"));
        trail.record(AuditEntry::new(AuditLevel::Critical, AuditCategory::Security, "b"));
        trail.record(AuditEntry::new(AuditLevel::Critical, AuditCategory::Security, "c"));

        let summary = trail.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_level[&AuditLevel::Critical], 2);
        assert_eq!(summary.by_category[&AuditCategory::System], 1);
        assert!(summary.oldest <= summary.newest);
    }
}
