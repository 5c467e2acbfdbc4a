use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::admin::AdminState;
use crate::audit::{AuditCategory, AuditEntry, AuditLevel};
use crate::http::request::client_ip;

pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    if let Some(token) = auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
        if token == &*state.api_key {
            return Ok(next.run(request).await);
        }
    }

    let (parts, _) = request.into_parts();
    let source = client_ip(&parts, false);
    tracing::warn!(client = %source, path = %parts.uri.path(), "Admin authentication failed");
    state.core.audit().record(
        AuditEntry::new(AuditLevel::Warn, AuditCategory::Authorization, "admin_auth_failed")
            .source(source)
            .method(parts.method.as_str())
            .resource(parts.uri.path())
            .status(401),
    );

    Err(StatusCode::UNAUTHORIZED)
}
