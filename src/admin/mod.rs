//! Operator API for inspecting and tuning the running guards.
//!
//! Served on its own listener (`admin.bind_address`) and protected by a
//! bearer key. Every route lives under `/admin`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::security::{InMemoryIdentifierRegistry, SecurityCore};

#[derive(Clone)]
pub struct AdminState {
    pub core: Arc<SecurityCore>,
    pub registry: Arc<InMemoryIdentifierRegistry>,
    pub api_key: Arc<str>,
    pub started_at: DateTime<Utc>,
}

impl AdminState {
    pub fn new(
        core: Arc<SecurityCore>,
        registry: Arc<InMemoryIdentifierRegistry>,
        api_key: &str,
    ) -> Self {
        let started_at = core.clock().now();
        Self {
            core,
            registry,
            api_key: Arc::from(api_key),
            started_at,
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/audit", get(get_audit))
        .route("/admin/audit/summary", get(get_audit_summary))
        .route("/admin/security", get(get_security))
        .route("/admin/domains", get(list_domains).post(add_domain))
        .route("/admin/domains/{domain}", delete(remove_domain))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
