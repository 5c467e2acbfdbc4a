//! Security middleware: evaluates every request before it is forwarded.
//!
//! # Data Flow
//! ```text
//! Request
//!     → buffer body (bounded by security.max_body_size)
//!     → describe (method, path, client address, headers, query, JSON body)
//!     → SecurityCore::evaluate
//!         denied  → JSON error + rate headers, upstream never sees it
//!         allowed → forward → SecurityCore::complete(status)
//!                           → identifier registry kept in sync
//!                           → rate headers on the upstream response
//! ```

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::time::Instant;

use crate::http::request::{client_ip, describe, RequestIdExt};
use crate::http::response::{apply_rate_headers, error_response, render_denial};
use crate::http::server::GatewayState;
use crate::security::{RequestDescriptor, Verdict};

pub async fn security_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let request_id = parts.request_id().to_string();

    let bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Rejecting unreadable or oversized body");
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Request body is too large",
            );
        }
    };

    let client = client_ip(&parts, state.trust_forwarded_for);
    let descriptor = describe(&parts, &bytes, &client);
    let verdict = state.core.evaluate(&descriptor);
    let now = state.core.clock().now();

    if let Some(denial) = &verdict.denial {
        tracing::info!(
            request_id = %request_id,
            client = %client,
            method = %descriptor.method,
            path = %descriptor.path,
            code = denial.code.as_str(),
            status = denial.status,
            "Request denied"
        );
        return render_denial(denial, verdict.rate.as_ref(), now);
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    let status = response.status().as_u16();
    state
        .core
        .complete(&descriptor, &verdict, status, started.elapsed().as_millis() as u64);

    let mut response = sync_registry(&state, &descriptor, &verdict, response).await;
    apply_rate_headers(response.headers_mut(), verdict.rate.as_ref(), now);
    response
}

/// The id of a newly created record, from `id` or `_id` in the response.
fn created_id(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    ["id", "_id"].iter().find_map(|key| match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Response body size when the upstream declared it.
fn declared_length(response: &Response) -> Option<u64> {
    response.body().size_hint().exact().or_else(|| {
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    })
}

/// Mirror successful record writes into the identifier registry.
///
/// A create response is only buffered when its declared size fits within
/// `max_body_size`; anything else is passed through untouched, since the
/// write already happened upstream.
async fn sync_registry(
    state: &GatewayState,
    descriptor: &RequestDescriptor,
    verdict: &Verdict,
    response: Response,
) -> Response {
    if !response.status().is_success() {
        return response;
    }

    if descriptor.method == "DELETE" {
        if let Some((route, Some(id))) = state.core.record_route(&descriptor.path) {
            state.registry.unregister(&route.category, &id);
        }
        return response;
    }

    let Some(accepted) = &verdict.national_id else {
        return response;
    };
    if let Some(id) = &accepted.record_id {
        state
            .registry
            .register(&accepted.category, &accepted.sanitized, id);
        return response;
    }

    match declared_length(&response) {
        Some(len) if len <= state.max_body_size as u64 => {}
        declared => {
            tracing::warn!(
                path = %descriptor.path,
                category = %accepted.category,
                declared_length = ?declared,
                limit = state.max_body_size,
                "Create response too large or unsized; identifier not indexed"
            );
            return response;
        }
    }

    let (parts, body) = response.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read upstream response body");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "Upstream response could not be read",
            );
        }
    };

    match created_id(&bytes) {
        Some(id) => state
            .registry
            .register(&accepted.category, &accepted.sanitized, &id),
        None => tracing::warn!(
            path = %descriptor.path,
            category = %accepted.category,
            "Created record has no id; identifier not indexed"
        ),
    }
    Response::from_parts(parts, Body::from(bytes))
}
