//! Request identification and translation into a [`RequestDescriptor`].
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) and echo it on the response
//! - Resolve the client address (peer, or `X-Forwarded-For` when trusted)
//! - Flatten headers, query string and JSON or form body for the guards
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Other or malformed bodies produce an empty field map; the upstream
//!   service owns payload validation

use axum::extract::ConnectInfo;
use axum::http::{request::Parts, HeaderMap, HeaderName};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

use crate::security::RequestDescriptor;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Assigns an `x-request-id` to requests that arrive without one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Copies the request's `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Access to the request ID assigned by [`set_request_id_layer`].
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl RequestIdExt for Parts {
    fn request_id(&self) -> &str {
        self.extensions
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
            .unwrap_or("unknown")
    }
}

/// The client address for rate limiting and lockout keys.
///
/// `X-Forwarded-For` is honoured only when the gateway sits behind a
/// trusted proxy; its first entry is the original client.
pub fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFormat {
    Json,
    Form,
    Other,
}

fn body_format(headers: &HeaderMap) -> BodyFormat {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if content_type.contains("json") {
        BodyFormat::Json
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        BodyFormat::Form
    } else {
        BodyFormat::Other
    }
}

/// Form fields as a flat JSON object; a repeated name keeps its last value.
fn form_fields(body: &[u8]) -> Value {
    let fields: Map<String, Value> = url::form_urlencoded::parse(body)
        .map(|(name, value)| (name.into_owned(), Value::String(value.into_owned())))
        .collect();
    Value::Object(fields)
}

/// Build the descriptor the security core evaluates.
pub fn describe(parts: &Parts, body: &[u8], client_ip: &str) -> RequestDescriptor {
    let mut descriptor =
        RequestDescriptor::new(parts.method.as_str(), parts.uri.path(), client_ip);

    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            descriptor = descriptor.with_header(name.as_str(), value);
        }
    }

    if let Some(query) = parts.uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            descriptor = descriptor.with_query(&name, &value);
        }
    }

    if !body.is_empty() {
        match body_format(&parts.headers) {
            BodyFormat::Json => match serde_json::from_slice::<Value>(body) {
                Ok(value) => descriptor = descriptor.with_body(value),
                Err(e) => tracing::debug!(error = %e, "Request body is not valid JSON"),
            },
            BodyFormat::Form => descriptor = descriptor.with_body(form_fields(body)),
            BodyFormat::Other => {}
        }
    }

    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_describe_collects_fields() {
        let parts = parts(
            Request::post("/api/students?avatar=http%3A%2F%2F10.0.0.1%2Fa.png&page=2")
                .header("Content-Type", "application/json; charset=utf-8")
                .header("User-Agent", "curl/8")
                .body(())
                .unwrap(),
        );
        let body = br#"{"name":"Ana","cpf":"529.982.247-25"}"#;
        let descriptor = describe(&parts, body, "203.0.113.9");

        assert_eq!(descriptor.method, "POST");
        assert_eq!(descriptor.path, "/api/students");
        assert_eq!(descriptor.client_ip, "203.0.113.9");
        assert_eq!(descriptor.user_agent(), Some("curl/8"));
        assert_eq!(descriptor.query["avatar"], "http://10.0.0.1/a.png");
        assert_eq!(descriptor.query["page"], "2");
        assert_eq!(descriptor.body_str("cpf"), Some("529.982.247-25"));
    }

    #[test]
    fn test_non_json_body_is_ignored() {
        let parts = parts(
            Request::post("/upload")
                .header("Content-Type", "text/plain")
                .body(())
                .unwrap(),
        );
        assert!(describe(&parts, b"{\"a\":1}", "1.2.3.4").body.is_empty());

        let parts = parts_json();
        assert!(describe(&parts, b"{broken", "1.2.3.4").body.is_empty());
    }

    #[test]
    fn test_form_body_is_parsed() {
        let parts = parts(
            Request::post("/api/auth/login")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(())
                .unwrap(),
        );
        let descriptor = describe(
            &parts,
            b"email=user%40example.com&password=wrong&avatar=http%3A%2F%2F127.0.0.1%2F",
            "203.0.113.9",
        );
        assert_eq!(descriptor.body_str("email"), Some("user@example.com"));
        assert_eq!(descriptor.body_str("password"), Some("wrong"));
        assert_eq!(descriptor.body_str("avatar"), Some("http://127.0.0.1/"));
    }

    fn parts_json() -> Parts {
        parts(
            Request::post("/x")
                .header("Content-Type", "application/json")
                .body(())
                .unwrap(),
        )
    }

    #[test]
    fn test_client_ip_resolution() {
        let mut request = Request::get("/")
            .header("X-Forwarded-For", "198.51.100.7, 10.0.0.2")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 40000))));
        let parts = parts(request);

        assert_eq!(client_ip(&parts, false), "10.0.0.2");
        assert_eq!(client_ip(&parts, true), "198.51.100.7");
        assert_eq!(client_ip(&parts_json(), false), "unknown");
    }
}
