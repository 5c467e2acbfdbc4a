//! SSRF screening for client-supplied URLs.
//!
//! # Checks (first failure wins)
//! ```text
//! parse → scheme http/https → not a private/loopback/link-local address
//!       → not localhost / 0.0.0.0 → host in allowlist → no '@' credentials
//! ```
//!
//! The allowlist is an [`ArcSwap`] so request-path reads never block on
//! administrative updates.

use arc_swap::ArcSwap;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use thiserror::Error;
use url::{Host, Url};

use crate::audit::{AuditCategory, AuditEntry, AuditLevel, AuditTrail};
use crate::security::request::RequestDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlRejection {
    #[error("malformed URL")]
    Malformed,
    #[error("protocol '{0}' is not allowed")]
    UnsupportedProtocol(String),
    #[error("private or internal addresses are not allowed")]
    PrivateAddress,
    #[error("localhost is not allowed")]
    Localhost,
    #[error("domain not authorized: {0}")]
    DomainNotAuthorized(String),
    #[error("credentials in URL are not allowed")]
    CredentialsInUrl,
}

impl UrlRejection {
    pub fn code(&self) -> &'static str {
        match self {
            UrlRejection::Malformed => "malformed",
            UrlRejection::UnsupportedProtocol(_) => "unsupported_protocol",
            UrlRejection::PrivateAddress => "private_address",
            UrlRejection::Localhost => "localhost",
            UrlRejection::DomainNotAuthorized(_) => "domain_not_authorized",
            UrlRejection::CredentialsInUrl => "credentials_in_url",
        }
    }
}

/// Result of [`SsrfGuard::validate_url`].
#[derive(Debug, Clone)]
pub struct UrlVerdict {
    pub valid: bool,
    pub rejection: Option<UrlRejection>,
    pub parsed: Option<Url>,
}

impl UrlVerdict {
    fn reject(rejection: UrlRejection) -> Self {
        Self {
            valid: false,
            rejection: Some(rejection),
            parsed: None,
        }
    }

    pub fn reason(&self) -> Option<String> {
        self.rejection.as_ref().map(ToString::to_string)
    }
}

/// A request field whose value failed URL screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlViolation {
    pub location: &'static str,
    pub field: String,
    pub rejection: UrlRejection,
}

impl fmt::Display for UrlViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid URL in field '{}': {}", self.field, self.rejection)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("domain must not be empty")]
    Empty,
    #[error("'{0}' is not a bare hostname")]
    NotAHostname(String),
}

/// Lowercase, strip a leading `*.`/`.` and a trailing `.`, and reject
/// anything that is not a bare hostname.
pub fn normalize_domain(raw: &str) -> Result<String, DomainError> {
    let lowered = raw.trim().to_ascii_lowercase();
    let trimmed = lowered
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(DomainError::Empty);
    }
    let valid = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !trimmed.contains("..");
    if !valid {
        return Err(DomainError::NotAHostname(raw.trim().to_string()));
    }
    Ok(trimmed.to_string())
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local()
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || (first & 0xffc0) == 0xfe80 // fe80::/10
        || (first & 0xfe00) == 0xfc00 // fc00::/7
}

/// Bare IPv4 literal, optionally with a port and path.
fn is_bare_ipv4(value: &str) -> bool {
    let authority = value.split('/').next().unwrap_or(value);
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    host.parse::<Ipv4Addr>().is_ok()
}

/// Normalize a field value into something worth validating, if it looks
/// like a URL at all.
fn url_candidate(value: &str) -> Option<String> {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix("//") {
        return Some(format!("http://{rest}"));
    }
    if value.contains("://") {
        return Some(value.to_string());
    }
    if is_bare_ipv4(value) {
        return Some(format!("http://{value}"));
    }
    None
}

pub struct SsrfGuard {
    allowed: ArcSwap<BTreeSet<String>>,
    url_fields: Vec<String>,
    audit: Arc<AuditTrail>,
}

impl SsrfGuard {
    pub fn new<I, S>(
        allowed_domains: I,
        url_fields: Vec<String>,
        audit: Arc<AuditTrail>,
    ) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = allowed_domains
            .into_iter()
            .map(|d| normalize_domain(d.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self {
            allowed: ArcSwap::from_pointee(allowed),
            url_fields,
            audit,
        })
    }

    pub fn allowed_domains(&self) -> Vec<String> {
        self.allowed.load().iter().cloned().collect()
    }

    fn is_authorized(&self, host: &str) -> bool {
        let allowed = self.allowed.load();
        allowed
            .iter()
            .any(|d| host == d || (host.ends_with(d.as_str()) && host[..host.len() - d.len()].ends_with('.')))
    }

    /// Classify a raw URL.
    pub fn validate_url(&self, raw: &str) -> UrlVerdict {
        let raw = raw.trim();
        let parsed = match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => return UrlVerdict::reject(UrlRejection::Malformed),
        };

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return UrlVerdict::reject(UrlRejection::UnsupportedProtocol(scheme.to_string()));
        }

        let host = match parsed.host() {
            Some(Host::Ipv4(ip)) => {
                if is_internal_v4(ip) {
                    return UrlVerdict::reject(UrlRejection::PrivateAddress);
                }
                if ip.is_unspecified() {
                    return UrlVerdict::reject(UrlRejection::Localhost);
                }
                ip.to_string()
            }
            Some(Host::Ipv6(ip)) => {
                if is_internal_v6(ip) {
                    return UrlVerdict::reject(UrlRejection::PrivateAddress);
                }
                if ip.is_unspecified() {
                    return UrlVerdict::reject(UrlRejection::Localhost);
                }
                ip.to_string()
            }
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                if domain == "localhost" || domain.ends_with(".localhost") {
                    return UrlVerdict::reject(UrlRejection::Localhost);
                }
                domain
            }
            None => return UrlVerdict::reject(UrlRejection::Malformed),
        };

        if !self.is_authorized(&host) {
            return UrlVerdict::reject(UrlRejection::DomainNotAuthorized(host));
        }

        if raw.contains('@') && !raw.to_ascii_lowercase().starts_with("mailto:") {
            return UrlVerdict::reject(UrlRejection::CredentialsInUrl);
        }

        UrlVerdict {
            valid: true,
            rejection: None,
            parsed: Some(parsed),
        }
    }

    /// Screen every candidate URL field of the request. Stops at the first
    /// violation, which is audited.
    pub fn scan_request(&self, request: &RequestDescriptor) -> Result<(), UrlViolation> {
        let result = self
            .scan_body(&request.body)
            .and_then(|_| self.scan_map("query", &request.query))
            .and_then(|_| self.scan_map("params", &request.params));

        if let Err(violation) = &result {
            tracing::warn!(
                client = %request.client_ip,
                path = %request.path,
                field = %violation.field,
                reason = %violation.rejection,
                "Blocked URL in request"
            );
            self.audit.record(
                AuditEntry::new(AuditLevel::Warn, AuditCategory::Security, "ssrf_blocked")
                    .source(&request.client_ip)
                    .method(&request.method)
                    .resource(&request.path)
                    .user_agent(request.user_agent())
                    .details(json!({
                        "location": violation.location,
                        "field": violation.field,
                        "reason": violation.rejection.code(),
                    })),
            );
        }
        result
    }

    fn scan_body(&self, body: &serde_json::Map<String, Value>) -> Result<(), UrlViolation> {
        for field in &self.url_fields {
            let values: Vec<&str> = match body.get(field) {
                Some(Value::String(s)) => vec![s.as_str()],
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
                _ => continue,
            };
            for value in values {
                self.check_value("body", field, value)?;
            }
        }
        Ok(())
    }

    fn scan_map(
        &self,
        location: &'static str,
        map: &HashMap<String, String>,
    ) -> Result<(), UrlViolation> {
        for field in &self.url_fields {
            if let Some(value) = map.get(field) {
                self.check_value(location, field, value)?;
            }
        }
        Ok(())
    }

    fn check_value(&self, location: &'static str, field: &str, value: &str) -> Result<(), UrlViolation> {
        let Some(candidate) = url_candidate(value) else {
            return Ok(());
        };
        match self.validate_url(&candidate).rejection {
            None => Ok(()),
            Some(rejection) => Err(UrlViolation {
                location,
                field: field.to_string(),
                rejection,
            }),
        }
    }

    /// Returns `true` if the domain was not already present.
    pub fn add_domain(&self, raw: &str, actor: &str) -> Result<bool, DomainError> {
        let domain = normalize_domain(raw)?;
        let previous = self.allowed.rcu(|current| {
            let mut next = BTreeSet::clone(current);
            next.insert(domain.clone());
            next
        });
        let added = !previous.contains(&domain);
        if added {
            tracing::warn!(domain = %domain, actor, "Allowed domain added");
            self.audit.record(
                AuditEntry::new(AuditLevel::Warn, AuditCategory::Configuration, "allowed_domain_added")
                    .actor(Some(actor), None)
                    .resource(domain.as_str())
                    .details(json!({ "domain": domain })),
            );
        }
        Ok(added)
    }

    /// Returns `true` if the domain was present.
    pub fn remove_domain(&self, raw: &str, actor: &str) -> Result<bool, DomainError> {
        let domain = normalize_domain(raw)?;
        let previous = self.allowed.rcu(|current| {
            let mut next = BTreeSet::clone(current);
            next.remove(&domain);
            next
        });
        let removed = previous.contains(&domain);
        if removed {
            tracing::info!(domain = %domain, actor, "Allowed domain removed");
            self.audit.record(
                AuditEntry::new(AuditLevel::Info, AuditCategory::Configuration, "allowed_domain_removed")
                    .actor(Some(actor), None)
                    .resource(domain.as_str())
                    .details(json!({ "domain": domain })),
            );
        }
        Ok(removed)
    }

    /// Swap in a whole new allowlist (config reload).
    pub fn replace_domains<I, S>(&self, domains: I, actor: &str) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = domains
            .into_iter()
            .map(|d| normalize_domain(d.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let previous = self.allowed.swap(Arc::new(next.clone()));
        if *previous != next {
            tracing::warn!(count = next.len(), actor, "Allowed domains replaced");
            self.audit.record(
                AuditEntry::new(AuditLevel::Warn, AuditCategory::Configuration, "allowed_domains_replaced")
                    .actor(Some(actor), None)
                    .details(json!({
                        "added": next.difference(&previous).collect::<Vec<_>>(),
                        "removed": previous.difference(&next).collect::<Vec<_>>(),
                    })),
            );
        }
        Ok(())
    }
}

impl fmt::Debug for SsrfGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsrfGuard")
            .field("allowed", &self.allowed_domains())
            .field("url_fields", &self.url_fields)
            .finish()
    }
}
