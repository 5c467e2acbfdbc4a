use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::audit::{AuditEvent, AuditFilter, AuditSummary};
use crate::http::response::error_response;
use crate::security::LockoutStats;

const ADMIN_ACTOR: &str = "admin";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: i64,
    pub audit_events: usize,
    pub allowed_domains: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    pub lockout: LockoutStats,
    pub rate_limit_keys: usize,
    pub registered_identifiers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DomainList {
    pub domains: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DomainRequest {
    pub domain: String,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let now = state.core.clock().now();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: (now - state.started_at).num_seconds().max(0),
        audit_events: state.core.audit().len(),
        allowed_domains: state.core.ssrf().allowed_domains().len(),
    })
}

pub async fn get_audit(
    State(state): State<AdminState>,
    Query(filter): Query<AuditFilter>,
) -> Json<Vec<AuditEvent>> {
    Json(state.core.audit().query(&filter))
}

pub async fn get_audit_summary(State(state): State<AdminState>) -> Json<AuditSummary> {
    Json(state.core.audit().summary())
}

pub async fn get_security(State(state): State<AdminState>) -> Json<SecurityStats> {
    Json(SecurityStats {
        lockout: state.core.lockout().stats(),
        rate_limit_keys: state.core.rate_limiter().tracked(),
        registered_identifiers: state.registry.len(),
    })
}

pub async fn list_domains(State(state): State<AdminState>) -> Json<DomainList> {
    Json(DomainList {
        domains: state.core.ssrf().allowed_domains(),
    })
}

pub async fn add_domain(
    State(state): State<AdminState>,
    Json(request): Json<DomainRequest>,
) -> Response {
    match state.core.ssrf().add_domain(&request.domain, ADMIN_ACTOR) {
        Ok(added) => {
            let status = if added { StatusCode::CREATED } else { StatusCode::OK };
            let domains = state.core.ssrf().allowed_domains();
            (status, Json(DomainList { domains })).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, "invalid_domain", &e.to_string()),
    }
}

pub async fn remove_domain(
    State(state): State<AdminState>,
    Path(domain): Path<String>,
) -> Response {
    match state.core.ssrf().remove_domain(&domain, ADMIN_ACTOR) {
        Ok(true) => Json(DomainList {
            domains: state.core.ssrf().allowed_domains(),
        })
        .into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            "domain_not_found",
            &format!("'{domain}' is not in the allowlist"),
        ),
        Err(e) => error_response(StatusCode::BAD_REQUEST, "invalid_domain", &e.to_string()),
    }
}
