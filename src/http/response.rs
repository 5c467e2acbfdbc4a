//! Response rendering for gateway decisions.
//!
//! # Responsibilities
//! - Render denials as `{ "error": code, "message": reason }` JSON
//! - Attach `RateLimit-*` and `Retry-After` headers
//!
//! # Design Decisions
//! - Rate headers are set on every response a policy applied to, allowed or not
//! - Gateway failures (oversized body, unreachable upstream) share the denial shape

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::security::{Denial, RateDecision};

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub violations: &'a [String],
}

fn set_number(headers: &mut HeaderMap, name: &'static str, value: u64) {
    headers.insert(name, HeaderValue::from(value));
}

/// `RateLimit-Limit`, `RateLimit-Remaining` and `RateLimit-Reset`.
pub fn apply_rate_headers(headers: &mut HeaderMap, rate: Option<&RateDecision>, now: DateTime<Utc>) {
    if let Some(rate) = rate {
        set_number(headers, "ratelimit-limit", u64::from(rate.limit));
        set_number(headers, "ratelimit-remaining", u64::from(rate.remaining));
        set_number(headers, "ratelimit-reset", rate.reset_in_secs(now));
    }
}

pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = ErrorBody {
        error: code,
        message,
        violations: &[],
    };
    (status, Json(body)).into_response()
}

pub fn render_denial(denial: &Denial, rate: Option<&RateDecision>, now: DateTime<Utc>) -> Response {
    let status = StatusCode::from_u16(denial.status).unwrap_or(StatusCode::BAD_REQUEST);
    let body = ErrorBody {
        error: denial.code.as_str(),
        message: &denial.reason,
        violations: &denial.violations,
    };

    let mut response = (status, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_rate_headers(headers, rate, now);
    if let Some(secs) = denial.retry_after_secs {
        set_number(headers, "retry-after", secs);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::DenialCode;
    use chrono::Duration;

    #[test]
    fn test_rate_denial_headers() {
        let now = Utc::now();
        let rate = RateDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: now + Duration::seconds(42),
            retry_after_secs: Some(42),
        };
        let denial = Denial::new(DenialCode::RateLimited, "Too many requests").retry_after(42);
        let response = render_denial(&denial, Some(&rate), now);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["ratelimit-limit"], "10");
        assert_eq!(headers["ratelimit-remaining"], "0");
        assert_eq!(headers["ratelimit-reset"], "42");
        assert_eq!(headers["retry-after"], "42");
    }

    #[test]
    fn test_denial_without_rate() {
        let denial = Denial::new(DenialCode::DuplicateNationalId, "CPF is already registered");
        let response = render_denial(&denial, None, Utc::now());
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response.headers().get("ratelimit-limit").is_none());
        assert!(response.headers().get("retry-after").is_none());
    }
}
