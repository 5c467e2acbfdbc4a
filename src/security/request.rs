//! Transport-independent request descriptor and decision types.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::security::rate_limit::RateDecision;

/// What the guards see of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    /// Uppercase HTTP method.
    pub method: String,
    pub path: String,
    pub client_ip: String,
    /// Lowercase header names.
    pub headers: HashMap<String, String>,
    /// Top-level JSON or form body fields; empty for other bodies.
    pub body: Map<String, Value>,
    pub query: HashMap<String, String>,
    /// Path parameters extracted by the host router.
    pub params: HashMap<String, String>,
}

impl RequestDescriptor {
    pub fn new(method: &str, path: &str, client_ip: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            client_ip: client_ip.to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Non-object JSON bodies are ignored.
    pub fn with_body(mut self, body: Value) -> Self {
        if let Value::Object(map) = body {
            self.body = map;
        }
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// The path as routes and rate windows see it.
    pub fn route(&self) -> String {
        normalize_path(&self.path)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    pub fn body_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
    }
}

/// Collapse repeated slashes and drop a trailing one, so `/a//b/` and
/// `/a/b` name the same route.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Machine-readable reason for a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCode {
    RateLimited,
    LockedOut,
    SsrfBlocked,
    InvalidNationalId,
    DuplicateNationalId,
    NationalIdUnverifiable,
    WeakPassword,
}

impl DenialCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialCode::RateLimited => "rate_limited",
            DenialCode::LockedOut => "locked_out",
            DenialCode::SsrfBlocked => "ssrf_blocked",
            DenialCode::InvalidNationalId => "invalid_national_id",
            DenialCode::DuplicateNationalId => "duplicate_national_id",
            DenialCode::NationalIdUnverifiable => "national_id_unverifiable",
            DenialCode::WeakPassword => "weak_password",
        }
    }

    /// Suggested HTTP status for the host transport.
    pub fn status(&self) -> u16 {
        match self {
            DenialCode::RateLimited => 429,
            DenialCode::LockedOut => 423,
            DenialCode::SsrfBlocked => 400,
            DenialCode::InvalidNationalId => 400,
            DenialCode::DuplicateNationalId => 409,
            DenialCode::NationalIdUnverifiable => 503,
            DenialCode::WeakPassword => 400,
        }
    }
}

/// A refused request, ready to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub code: DenialCode,
    pub reason: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Per-rule feedback, e.g. every violated password rule.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl Denial {
    pub fn new(code: DenialCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            status: code.status(),
            retry_after_secs: None,
            violations: Vec::new(),
        }
    }

    pub fn retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn violations(mut self, violations: Vec<String>) -> Self {
        self.violations = violations;
        self
    }
}

/// Outcome of [`SecurityCore::evaluate`](super::core::SecurityCore::evaluate).
#[derive(Debug, Clone)]
pub struct Verdict {
    /// `None` when the request may proceed.
    pub denial: Option<Denial>,
    /// Rate metadata for response headers, if a policy applied.
    pub rate: Option<RateDecision>,
    /// Key of the rate window that counted this request.
    pub rate_key: Option<String>,
    /// The login policy was applied and successful responses are refunded.
    pub refund_on_success: bool,
    /// Normalized login identifier, for authentication attempts.
    pub login_identifier: Option<String>,
    /// Sanitized national identifier accepted for a record write.
    pub national_id: Option<AcceptedNationalId>,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        self.denial.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedNationalId {
    pub category: String,
    pub sanitized: String,
    /// Record being updated, when known from the path.
    pub record_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_builders() {
        let desc = RequestDescriptor::new("post", "/api/students", "203.0.113.9")
            .with_header("User-Agent", "curl/8.0")
            .with_body(json!({ "email": "ana@example.com", "age": 20 }))
            .with_query("page", "2");

        assert_eq!(desc.method, "POST");
        assert!(desc.is_mutating());
        assert_eq!(desc.user_agent(), Some("curl/8.0"));
        assert_eq!(desc.body_str("email"), Some("ana@example.com"));
        assert_eq!(desc.body_str("age"), None);
        assert_eq!(desc.query.get("page").map(String::as_str), Some("2"));

        let ignored = RequestDescriptor::new("GET", "/", "::1").with_body(json!([1, 2]));
        assert!(ignored.body.is_empty());
        assert!(!ignored.is_mutating());
    }

    #[test]
    fn test_route_normalization() {
        assert_eq!(normalize_path("/api/auth/login"), "/api/auth/login");
        assert_eq!(normalize_path("/api/auth/login/"), "/api/auth/login");
        assert_eq!(normalize_path("/api//auth/login//"), "/api/auth/login");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(
            RequestDescriptor::new("POST", "//api/notes/", "::1").route(),
            "/api/notes"
        );
    }

    #[test]
    fn test_denial_statuses() {
        let denial = Denial::new(DenialCode::RateLimited, "Too many requests").retry_after(30);
        assert_eq!(denial.status, 429);
        assert_eq!(denial.retry_after_secs, Some(30));
        assert_eq!(Denial::new(DenialCode::LockedOut, "locked").status, 423);
        assert_eq!(Denial::new(DenialCode::DuplicateNationalId, "dup").status, 409);
    }
}
