//! The request-security pipeline.
//!
//! One [`SecurityCore`] is built at startup and shared by reference. It owns
//! every guard's state and turns a [`RequestDescriptor`] into a [`Verdict`]:
//!
//! ```text
//! rate limit (general, then strict or login)
//!     → lockout (login attempts)
//!     → password strength (password-setting routes)
//!     → SSRF scan (candidate URL fields)
//!     → national id checksum + uniqueness (record writes)
//! ```
//!
//! The first denial wins. After the host has produced a response,
//! [`SecurityCore::complete`] does the bookkeeping that depends on the
//! outcome (login success/failure, refunds for the login policy).

use serde_json::json;
use std::sync::Arc;

use crate::audit::{AuditCategory, AuditEntry, AuditLevel, AuditTrail};
use crate::clock::SharedClock;
use crate::config::{GuardConfig, RecordRouteConfig};
use crate::observability::metrics;
use crate::security::lockout::{normalize_identifier, LockoutGuard, LockoutSettings};
use crate::security::national_id::{IdentifierLookup, NationalIdGuard, NationalIdRejection};
use crate::security::password;
use crate::security::rate_limit::{RateDecision, RateLimiter, RatePolicy};
use crate::security::request::{
    normalize_path, AcceptedNationalId, Denial, DenialCode, RequestDescriptor, Verdict,
};
use crate::security::ssrf::{DomainError, SsrfGuard};

#[derive(Debug, Clone)]
struct Routes {
    login_paths: Vec<String>,
    password_paths: Vec<String>,
    identifier_field: String,
    password_field: String,
    national_id_field: String,
    records: Vec<RecordRouteConfig>,
}

#[derive(Debug, Clone, Copy)]
struct Switches {
    rate_limit: bool,
    lockout: bool,
    ssrf: bool,
    national_id: bool,
}

pub struct SecurityCore {
    clock: SharedClock,
    audit: Arc<AuditTrail>,
    rate_limiter: RateLimiter,
    lockout: LockoutGuard,
    ssrf: SsrfGuard,
    national_id: NationalIdGuard,
    general: RatePolicy,
    strict: RatePolicy,
    login: RatePolicy,
    routes: Routes,
    switches: Switches,
}

impl SecurityCore {
    pub fn from_config(
        config: &GuardConfig,
        lookup: Arc<dyn IdentifierLookup>,
        clock: SharedClock,
    ) -> Result<Self, DomainError> {
        let audit = Arc::new(AuditTrail::from_config(&config.audit, clock.clone()));
        let ssrf = SsrfGuard::new(
            &config.ssrf.allowed_domains,
            config.ssrf.url_fields.clone(),
            audit.clone(),
        )?;

        Ok(Self {
            rate_limiter: RateLimiter::new(clock.clone(), audit.clone()),
            lockout: LockoutGuard::new(
                LockoutSettings::from(&config.lockout),
                clock.clone(),
                audit.clone(),
            ),
            ssrf,
            national_id: NationalIdGuard::new(
                lookup,
                config.national_id.on_lookup_failure,
                audit.clone(),
            ),
            general: RatePolicy::from_config("general", &config.rate_limit.general),
            strict: RatePolicy::from_config("strict", &config.rate_limit.strict),
            login: RatePolicy::from_config("login", &config.rate_limit.login),
            routes: Routes {
                login_paths: config.auth.login_paths.clone(),
                password_paths: config.auth.password_paths.clone(),
                identifier_field: config.auth.identifier_field.clone(),
                password_field: config.auth.password_field.clone(),
                national_id_field: config.national_id.field.clone(),
                records: config.national_id.records.clone(),
            },
            switches: Switches {
                rate_limit: config.rate_limit.enabled,
                lockout: config.lockout.enabled,
                ssrf: config.ssrf.enabled,
                national_id: config.national_id.enabled,
            },
            clock,
            audit,
        })
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn lockout(&self) -> &LockoutGuard {
        &self.lockout
    }

    pub fn ssrf(&self) -> &SsrfGuard {
        &self.ssrf
    }

    pub fn national_id(&self) -> &NationalIdGuard {
        &self.national_id
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// A POST to one of the configured login paths.
    pub fn is_login(&self, request: &RequestDescriptor) -> bool {
        let route = request.route();
        request.method == "POST"
            && self
                .routes
                .login_paths
                .iter()
                .any(|p| normalize_path(p) == route)
    }

    fn sets_password(&self, request: &RequestDescriptor) -> bool {
        let route = request.route();
        matches!(request.method.as_str(), "POST" | "PUT" | "PATCH")
            && self
                .routes
                .password_paths
                .iter()
                .any(|p| normalize_path(p) == route)
    }

    /// The record route a path belongs to, plus the record id segment if
    /// the path addresses a single record.
    pub fn record_route(&self, path: &str) -> Option<(&RecordRouteConfig, Option<String>)> {
        let path = normalize_path(path);
        self.routes.records.iter().find_map(|route| {
            let prefix = normalize_path(&route.path_prefix);
            if path == prefix {
                return Some((route, None));
            }
            let rest = path.strip_prefix(prefix.as_str())?.strip_prefix('/')?;
            let id = rest.split('/').next().filter(|s| !s.is_empty())?;
            Some((route, Some(id.to_string())))
        })
    }

    /// Run every applicable guard. Nothing here blocks or awaits.
    pub fn evaluate(&self, request: &RequestDescriptor) -> Verdict {
        let mut verdict = Verdict {
            denial: None,
            rate: None,
            rate_key: None,
            refund_on_success: false,
            login_identifier: None,
            national_id: None,
        };
        let is_login = self.is_login(request);

        let mut denial = self.check_rate(request, is_login, &mut verdict);
        if denial.is_none() {
            denial = self.check_lockout(request, is_login, &mut verdict);
        }
        if denial.is_none() {
            denial = self.check_password(request);
        }
        if denial.is_none() {
            denial = self.check_urls(request);
        }
        if denial.is_none() {
            denial = self.check_national_id(request, &mut verdict);
        }
        verdict.denial = denial;

        match &verdict.denial {
            None => metrics::record_request("allowed"),
            Some(denial) => {
                metrics::record_request("denied");
                metrics::record_denial(denial.code.as_str());
                tracing::debug!(
                    client = %request.client_ip,
                    method = %request.method,
                    path = %request.path,
                    code = denial.code.as_str(),
                    "Request denied"
                );
            }
        }
        verdict
    }

    fn check_rate(
        &self,
        request: &RequestDescriptor,
        is_login: bool,
        verdict: &mut Verdict,
    ) -> Option<Denial> {
        if !self.switches.rate_limit {
            return None;
        }

        let (_, general) = self.rate_limiter.check_request(&self.general, request);
        verdict.rate = Some(general.clone());
        if !general.allowed {
            return Some(rate_denial(&general));
        }

        let scoped = if is_login {
            Some(&self.login)
        } else if request.is_mutating() {
            Some(&self.strict)
        } else {
            None
        };

        let policy = scoped?;
        let (key, decision) = self.rate_limiter.check_request(policy, request);
        if decision.remaining <= general.remaining {
            verdict.rate = Some(decision.clone());
        }
        if !decision.allowed {
            verdict.rate = Some(decision.clone());
            return Some(rate_denial(&decision));
        }
        if policy.skip_successful {
            verdict.rate_key = Some(key);
            verdict.refund_on_success = true;
        }
        None
    }

    fn check_lockout(
        &self,
        request: &RequestDescriptor,
        is_login: bool,
        verdict: &mut Verdict,
    ) -> Option<Denial> {
        if !is_login {
            return None;
        }
        let identifier = request.body_str(&self.routes.identifier_field);
        verdict.login_identifier = identifier.map(normalize_identifier);
        if !self.switches.lockout {
            return None;
        }

        let status = self.lockout.check_login(&request.client_ip, identifier);
        if !status.locked {
            return None;
        }
        let minutes = status.remaining_seconds.div_ceil(60);
        Some(
            Denial::new(
                DenialCode::LockedOut,
                format!("Too many failed login attempts. Try again in {minutes} minute(s)."),
            )
            .retry_after(status.remaining_seconds),
        )
    }

    fn check_password(&self, request: &RequestDescriptor) -> Option<Denial> {
        if !self.sets_password(request) {
            return None;
        }
        let candidate = request.body_str(&self.routes.password_field)?;
        let report = password::check_strength(candidate);
        if report.is_strong() {
            return None;
        }

        self.audit.record(
            AuditEntry::new(AuditLevel::Info, AuditCategory::Authentication, "weak_password_rejected")
                .source(&request.client_ip)
                .method(&request.method)
                .resource(&request.path)
                .status(400)
                .details(json!({ "violations": report.violations })),
        );
        Some(
            Denial::new(
                DenialCode::WeakPassword,
                "Password does not meet the strength requirements",
            )
            .violations(report.messages()),
        )
    }

    fn check_urls(&self, request: &RequestDescriptor) -> Option<Denial> {
        if !self.switches.ssrf {
            return None;
        }
        self.ssrf
            .scan_request(request)
            .err()
            .map(|violation| Denial::new(DenialCode::SsrfBlocked, violation.to_string()))
    }

    fn check_national_id(&self, request: &RequestDescriptor, verdict: &mut Verdict) -> Option<Denial> {
        if !self.switches.national_id || !matches!(request.method.as_str(), "POST" | "PUT" | "PATCH") {
            return None;
        }
        let (route, record_id) = self.record_route(&request.path)?;
        let raw = match request.body.get(&self.routes.national_id_field)? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        };

        match self.national_id.validate_for_write(
            &route.category,
            &raw,
            record_id.as_deref(),
            &request.client_ip,
        ) {
            Ok(sanitized) => {
                verdict.national_id = Some(AcceptedNationalId {
                    category: route.category.clone(),
                    sanitized,
                    record_id,
                });
                None
            }
            Err(rejection) => {
                let code = match rejection {
                    NationalIdRejection::Invalid(_) => DenialCode::InvalidNationalId,
                    NationalIdRejection::Duplicate => DenialCode::DuplicateNationalId,
                    NationalIdRejection::Unverifiable => DenialCode::NationalIdUnverifiable,
                };
                Some(Denial::new(code, rejection.to_string()))
            }
        }
    }

    /// Outcome-dependent bookkeeping once the host has a response status.
    pub fn complete(&self, request: &RequestDescriptor, verdict: &Verdict, status: u16, elapsed_ms: u64) {
        let succeeded = (200..400).contains(&status);

        if verdict.refund_on_success && succeeded {
            if let Some(key) = &verdict.rate_key {
                self.rate_limiter.release(key);
            }
        }

        if self.is_login(request) && self.switches.lockout {
            let identifier = verdict.login_identifier.as_deref();
            if succeeded {
                self.lockout.record_success(&request.client_ip, identifier);
            } else if status == 401 || status == 403 {
                self.lockout.record_login_failure(&request.client_ip, identifier);
            }
            return;
        }

        if request.is_mutating() && succeeded {
            let action = match request.method.as_str() {
                "POST" => "record_created",
                "DELETE" => "record_deleted",
                _ => "record_updated",
            };
            let mut details = json!({});
            if let Some(accepted) = &verdict.national_id {
                details["category"] = json!(accepted.category);
                details["maskedCpf"] = json!(crate::security::national_id::mask(&accepted.sanitized));
            }
            self.audit.record(
                AuditEntry::new(AuditLevel::Info, AuditCategory::DataModification, action)
                    .source(&request.client_ip)
                    .user_agent(request.user_agent())
                    .method(&request.method)
                    .resource(&request.path)
                    .status(status)
                    .duration_ms(elapsed_ms)
                    .details(details),
            );
        }
    }
}

fn rate_denial(decision: &RateDecision) -> Denial {
    let retry = decision.retry_after_secs.unwrap_or(1);
    Denial::new(
        DenialCode::RateLimited,
        "Too many requests, please try again later.",
    )
    .retry_after(retry)
}
