//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and addresses.
//! Every problem is reported, not just the first.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{GuardConfig, RatePolicyConfig};
use crate::security::ssrf::normalize_domain;

/// Longest rate window or lockout period accepted: 30 days.
pub const MAX_PERIOD_SECS: u64 = 30 * 24 * 60 * 60;
/// Longest interval between background sweeps: 1 day.
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 60 * 60;
/// Ten years.
pub const MAX_RETENTION_DAYS: u32 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_addr(&mut errors, "upstream.address", &config.upstream.address);
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.len() < 16 {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be at least 16 characters",
            ));
        }
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    check_secs(&mut errors, "timeouts.request_secs", config.timeouts.request_secs, MAX_REQUEST_TIMEOUT_SECS);

    let rate = &config.rate_limit;
    check_policy(&mut errors, "rate_limit.general", &rate.general);
    check_policy(&mut errors, "rate_limit.strict", &rate.strict);
    check_policy(&mut errors, "rate_limit.login", &rate.login);
    check_secs(&mut errors, "rate_limit.sweep_interval_secs", rate.sweep_interval_secs, MAX_SWEEP_INTERVAL_SECS);

    let lockout = &config.lockout;
    if lockout.max_attempts == 0 {
        errors.push(ValidationError::new("lockout.max_attempts", "must be > 0"));
    }
    check_secs(&mut errors, "lockout.lockout_secs", lockout.lockout_secs, MAX_PERIOD_SECS);
    check_secs(&mut errors, "lockout.attempt_window_secs", lockout.attempt_window_secs, MAX_PERIOD_SECS);
    check_secs(&mut errors, "lockout.sweep_interval_secs", lockout.sweep_interval_secs, MAX_SWEEP_INTERVAL_SECS);

    for (i, path) in config.auth.login_paths.iter().enumerate() {
        check_path(&mut errors, &format!("auth.login_paths[{i}]"), path);
    }
    for (i, path) in config.auth.password_paths.iter().enumerate() {
        check_path(&mut errors, &format!("auth.password_paths[{i}]"), path);
    }

    for (i, domain) in config.ssrf.allowed_domains.iter().enumerate() {
        if let Err(e) = normalize_domain(domain) {
            errors.push(ValidationError::new(
                format!("ssrf.allowed_domains[{i}]"),
                e.to_string(),
            ));
        }
    }

    for (i, record) in config.national_id.records.iter().enumerate() {
        check_path(&mut errors, &format!("national_id.records[{i}].path_prefix"), &record.path_prefix);
        if record.category.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("national_id.records[{i}].category"),
                "must not be empty",
            ));
        }
    }

    if config.audit.capacity == 0 {
        errors.push(ValidationError::new("audit.capacity", "must be > 0"));
    }
    if config.audit.retention_days == 0 || config.audit.retention_days > MAX_RETENTION_DAYS {
        errors.push(ValidationError::new(
            "audit.retention_days",
            format!("must be between 1 and {MAX_RETENTION_DAYS}"),
        ));
    }
    check_secs(&mut errors, "audit.sweep_interval_secs", config.audit.sweep_interval_secs, MAX_SWEEP_INTERVAL_SECS);

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{value}'")));
    }
}

fn check_path(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if !value.starts_with('/') {
        errors.push(ValidationError::new(field, "must start with '/'"));
    }
}

fn check_secs(errors: &mut Vec<ValidationError>, field: &str, value: u64, max: u64) {
    if value == 0 || value > max {
        errors.push(ValidationError::new(field, format!("must be between 1 and {max}")));
    }
}

fn check_policy(errors: &mut Vec<ValidationError>, field: &str, policy: &RatePolicyConfig) {
    check_secs(errors, &format!("{field}.window_secs"), policy.window_secs, MAX_PERIOD_SECS);
    if policy.max_requests == 0 {
        errors.push(ValidationError::new(format!("{field}.max_requests"), "must be > 0"));
    }
}
