//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::security::national_id::LookupFailurePolicy;

/// Root configuration for the security gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream CRUD service that allowed requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting policies.
    pub rate_limit: RateLimitConfig,

    /// Brute-force lockout settings.
    pub lockout: LockoutConfig,

    /// Authentication routes subject to lockout.
    pub auth: AuthConfig,

    /// Outbound URL screening.
    pub ssrf: SsrfConfig,

    /// National identifier (CPF) checks on record routes.
    pub national_id: NationalIdConfig,

    /// Audit trail sizing and retention.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// One fixed-window policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RatePolicyConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    /// Successful responses do not count toward the limit.
    #[serde(default)]
    pub skip_successful: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Applied to every request.
    pub general: RatePolicyConfig,

    /// Applied to mutating methods (POST, PUT, PATCH, DELETE).
    pub strict: RatePolicyConfig,

    /// Applied to login routes.
    pub login: RatePolicyConfig,

    /// How often expired windows are swept.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            general: RatePolicyConfig {
                window_secs: 15 * 60,
                max_requests: 100,
                skip_successful: false,
            },
            strict: RatePolicyConfig {
                window_secs: 60,
                max_requests: 10,
                skip_successful: false,
            },
            login: RatePolicyConfig {
                window_secs: 15 * 60,
                max_requests: 5,
                skip_successful: true,
            },
            sweep_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub enabled: bool,
    /// Failures before an IP or identifier is locked.
    pub max_attempts: u32,
    pub lockout_secs: u64,
    /// Failures older than this no longer count.
    pub attempt_window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            lockout_secs: 15 * 60,
            attempt_window_secs: 15 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Paths treated as authentication attempts when POSTed.
    pub login_paths: Vec<String>,
    /// Body field carrying the login identifier.
    pub identifier_field: String,
    /// Body field carrying the password, used for strength checks on
    /// registration paths.
    pub password_field: String,
    /// Paths where a new password is submitted.
    pub password_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_paths: vec!["/api/auth/login".to_string()],
            identifier_field: "email".to_string(),
            password_field: "password".to_string(),
            password_paths: vec![
                "/api/auth/register".to_string(),
                "/api/auth/change-password".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SsrfConfig {
    pub enabled: bool,
    /// Hostname suffixes that client-supplied URLs may point to.
    pub allowed_domains: Vec<String>,
    /// Request fields scanned for URLs.
    pub url_fields: Vec<String>,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_domains: vec![
                "googleapis.com".to_string(),
                "amazonaws.com".to_string(),
                "cloudinary.com".to_string(),
            ],
            url_fields: [
                "url",
                "imageUrl",
                "image_url",
                "photoUrl",
                "avatarUrl",
                "avatar",
                "foto",
                "link",
                "website",
                "callback",
                "callbackUrl",
                "redirect",
                "redirectUrl",
                "webhook",
                "webhookUrl",
                "endpoint",
                "src",
                "href",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// A route family whose records carry a national identifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordRouteConfig {
    /// Record category used to scope uniqueness (e.g., "students").
    pub category: String,
    pub path_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NationalIdConfig {
    pub enabled: bool,
    /// Body field holding the identifier.
    pub field: String,
    pub on_lookup_failure: LookupFailurePolicy,
    pub records: Vec<RecordRouteConfig>,
    /// JSON array of `{category, cpf, id}` indexed at startup.
    pub seed_file: Option<String>,
}

impl Default for NationalIdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            field: "cpf".to_string(),
            on_lookup_failure: LookupFailurePolicy::Allow,
            records: vec![
                RecordRouteConfig {
                    category: "students".to_string(),
                    path_prefix: "/api/students".to_string(),
                },
                RecordRouteConfig {
                    category: "professors".to_string(),
                    path_prefix: "/api/professors".to_string(),
                },
            ],
            seed_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum retained events; oldest are evicted first.
    pub capacity: usize,
    pub retention_days: u32,
    pub sweep_interval_secs: u64,
    /// Detail keys replaced before storage.
    pub sensitive_keys: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            retention_days: 30,
            sweep_interval_secs: 24 * 60 * 60,
            sensitive_keys: crate::audit::masking::DEFAULT_SENSITIVE_KEYS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered body size in bytes.
    pub max_body_size: usize,
    /// Honour the first X-Forwarded-For hop as the client address.
    pub trust_forwarded_for: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
            trust_forwarded_for: false,
        }
    }
}
