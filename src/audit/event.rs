//! Audit event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
    Critical,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warn => "warn",
            AuditLevel::Error => "error",
            AuditLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain tag of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Authentication,
    Authorization,
    DataAccess,
    DataModification,
    Security,
    RateLimit,
    Configuration,
    System,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Authentication => "authentication",
            AuditCategory::Authorization => "authorization",
            AuditCategory::DataAccess => "data_access",
            AuditCategory::DataModification => "data_modification",
            AuditCategory::Security => "security",
            AuditCategory::RateLimit => "rate_limit",
            AuditCategory::Configuration => "configuration",
            AuditCategory::System => "system",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored audit event. Only the trail constructs these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub category: AuditCategory,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
    pub source_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// An event as submitted to [`AuditTrail::record`](super::AuditTrail::record).
///
/// Built fluently:
///
/// ```
/// use portal_guard::audit::{AuditCategory, AuditEntry, AuditLevel};
///
/// let entry = AuditEntry::new(AuditLevel::Warn, AuditCategory::RateLimit, "rate_limit_exceeded")
///     .source("203.0.113.7")
///     .method("POST")
///     .resource("/api/students");
/// assert_eq!(entry.action, "rate_limit_exceeded");
/// ```
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: Option<DateTime<Utc>>,
    pub level: AuditLevel,
    pub category: AuditCategory,
    pub action: String,
    pub actor_id: Option<String>,
    pub actor_email: Option<String>,
    pub source_address: String,
    pub user_agent: Option<String>,
    pub resource: Option<String>,
    pub method: String,
    pub status_code: Option<u16>,
    pub details: Option<Value>,
    pub duration_ms: Option<u64>,
}

impl AuditEntry {
    pub fn new(level: AuditLevel, category: AuditCategory, action: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            level,
            category,
            action: action.into(),
            actor_id: None,
            actor_email: None,
            source_address: "internal".to_string(),
            user_agent: None,
            resource: None,
            method: "-".to_string(),
            status_code: None,
            details: None,
            duration_ms: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn actor(mut self, id: Option<&str>, email: Option<&str>) -> Self {
        self.actor_id = id.map(str::to_string);
        self.actor_email = email.map(str::to_string);
        self
    }

    pub fn source(mut self, address: impl Into<String>) -> Self {
        self.source_address = address.into();
        self
    }

    pub fn user_agent(mut self, agent: Option<&str>) -> Self {
        self.user_agent = agent.map(str::to_string);
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
