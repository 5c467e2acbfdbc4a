//! End-to-end behavior of the gateway in front of a mock upstream.

use axum::http::StatusCode;
use portal_guard::audit::{AuditCategory, AuditFilter};
use serde_json::json;

mod common;
use common::{gateway, gateway_with, request, send};

#[tokio::test]
async fn test_allowed_request_is_forwarded() {
    let gw = gateway().await;

    let (status, headers, body) = send(&gw.router, request("GET", "/api/schedules", "203.0.113.10", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["collection"], "schedules");
    assert_eq!(headers["ratelimit-limit"], "100");
    assert_eq!(headers["ratelimit-remaining"], "99");
    assert_eq!(headers["ratelimit-reset"], "900");

    let request_id = headers["x-request-id"].to_str().unwrap();
    assert_eq!(request_id.len(), 36);
}

#[tokio::test]
async fn test_strict_rate_limit() {
    let gw = gateway().await;
    let ip = "203.0.113.11";

    for _ in 0..10 {
        let (status, _, _) = send(&gw.router, request("DELETE", "/api/announcements/1", ip, None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, headers, body) = send(&gw.router, request("DELETE", "/api/announcements/1", ip, None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(headers["retry-after"], "60");
    assert_eq!(headers["ratelimit-limit"], "10");
    assert_eq!(headers["ratelimit-remaining"], "0");
    assert!(headers.contains_key("x-request-id"));

    // Another client is unaffected
    let (status, _, _) = send(&gw.router, request("DELETE", "/api/announcements/1", "203.0.113.12", None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // A new window opens once the old one has passed
    gw.clock.advance(chrono::Duration::seconds(60));
    let (status, _, _) = send(&gw.router, request("DELETE", "/api/announcements/1", ip, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let limited = gw.core.audit().query(&AuditFilter {
        category: Some(AuditCategory::RateLimit),
        ..Default::default()
    });
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].action, "rate_limit_exceeded");
    assert_eq!(limited[0].source_address, ip);
}

#[tokio::test]
async fn test_ssrf_blocked() {
    let gw = gateway().await;
    let ip = "203.0.113.20";

    let (status, _, body) = send(
        &gw.router,
        request(
            "PUT",
            "/api/professors/p1",
            ip,
            Some(json!({ "photoUrl": "http://169.254.169.254/latest/meta-data" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ssrf_blocked");
    assert!(body["message"].as_str().unwrap().contains("photoUrl"));

    let (status, _, body) = send(
        &gw.router,
        request("GET", "/api/preview?url=http%3A%2F%2Flocalhost%3A8080%2Fadmin", ip, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ssrf_blocked");

    let (status, _, body) = send(
        &gw.router,
        request(
            "POST",
            "/api/professors",
            ip,
            Some(json!({ "name": "Bia", "avatarUrl": "https://storage.googleapis.com/portal/bia.png" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Bia");
}

#[tokio::test]
async fn test_national_id_lifecycle() {
    let gw = gateway().await;
    let cpf = "529.982.247-25";

    let (status, _, created) = send(
        &gw.router,
        request("POST", "/api/students", "203.0.113.30", Some(json!({ "name": "Ana", "cpf": cpf }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(gw.registry.len(), 1);

    // Same identifier, formatted differently, from another client
    let (status, _, body) = send(
        &gw.router,
        request("POST", "/api/students", "203.0.113.31", Some(json!({ "name": "Outra", "cpf": "52998224725" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_national_id");

    // The record that holds it may keep it
    let (status, _, _) = send(
        &gw.router,
        request("PUT", &format!("/api/students/{id}"), "203.0.113.30", Some(json!({ "name": "Ana Maria", "cpf": cpf }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Professors are a separate namespace
    let (status, _, _) = send(
        &gw.router,
        request("POST", "/api/professors", "203.0.113.30", Some(json!({ "name": "Ana", "cpf": cpf }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = send(
        &gw.router,
        request("POST", "/api/students", "203.0.113.32", Some(json!({ "cpf": "123.456.789-00" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_national_id");

    let (status, _, body) = send(
        &gw.router,
        request("PATCH", "/api/students/9", "203.0.113.32", Some(json!({ "cpf": "111.111.111-11" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_national_id");

    // Deleting the record frees the identifier
    let (status, _, _) = send(&gw.router, request("DELETE", &format!("/api/students/{id}"), "203.0.113.30", None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(
        &gw.router,
        request("POST", "/api/students", "203.0.113.31", Some(json!({ "name": "Outra", "cpf": "52998224725" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Rejections were audited with the identifier masked
    let rejected = gw.core.audit().query(&AuditFilter::default());
    let masked = rejected
        .iter()
        .filter(|e| e.action == "cpf_rejected")
        .map(|e| e.details.as_ref().unwrap()["maskedCpf"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert!(masked.contains(&"***.***.247-25".to_string()));
    assert!(!serde_json::to_string(&rejected).unwrap().contains("52998224725"));
}

#[tokio::test]
async fn test_weak_password_rejected() {
    let gw = gateway().await;

    let (status, _, body) = send(
        &gw.router,
        request(
            "POST",
            "/api/auth/register",
            "203.0.113.40",
            Some(json!({ "email": "new@example.com", "password": "abc" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "weak_password");
    assert_eq!(body["violations"].as_array().unwrap().len(), 4);

    let (status, _, _) = send(
        &gw.router,
        request(
            "POST",
            "/api/auth/register",
            "203.0.113.40",
            Some(json!({ "email": "new@example.com", "password": "Tr0ub4dor&3x" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let gw = gateway_with(|config| config.security.max_body_size = 64).await;

    let (status, _, body) = send(
        &gw.router,
        request("POST", "/api/notes", "203.0.113.50", Some(json!({ "text": "x".repeat(200) }))),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "payload_too_large");
}

#[tokio::test]
async fn test_large_create_response_passes_through() {
    let gw = gateway_with(|config| config.security.max_body_size = 1024).await;

    let (status, _, body) = send(
        &gw.router,
        request(
            "POST",
            "/api/students",
            "203.0.113.55",
            Some(json!({ "name": "Ana", "cpf": "529.982.247-25", "verbose": true })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Ana");
    assert_eq!(body["history"].as_str().unwrap().len(), 4096);
    // Too large to inspect, so the identifier was not indexed
    assert_eq!(gw.registry.len(), 0);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let gw = gateway_with(|config| config.timeouts.request_secs = 1).await;

    let (status, headers, _) = send(&gw.router, request("GET", "/api/slow", "203.0.113.65", None)).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_upstream_unavailable() {
    let gw = gateway_with(|config| config.upstream.address = "127.0.0.1:1".into()).await;

    let (status, _, body) = send(&gw.router, request("GET", "/api/schedules", "203.0.113.60", None)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "upstream_unavailable");
}
