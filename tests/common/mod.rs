//! Shared utilities for integration tests: a mock upstream service and a
//! gateway wired to it with a manual clock.
#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use portal_guard::admin::{setup_admin_router, AdminState};
use portal_guard::clock::ManualClock;
use portal_guard::config::GuardConfig;
use portal_guard::http::GatewayServer;
use portal_guard::security::{InMemoryIdentifierRegistry, SecurityCore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const VALID_PASSWORD: &str = "Correct-Horse-9";
pub const ADMIN_KEY: &str = "test-admin-key-0123456789";

async fn login(Json(body): Json<Value>) -> impl IntoResponse {
    if body["password"] == VALID_PASSWORD {
        (StatusCode::OK, Json(json!({ "token": "session-token" })))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid credentials" })))
    }
}

async fn register(Json(body): Json<Value>) -> impl IntoResponse {
    (StatusCode::CREATED, Json(json!({ "email": body["email"] })))
}

async fn create(
    State(next_id): State<Arc<AtomicU32>>,
    Path(_collection): Path<String>,
    Json(mut body): Json<Value>,
) -> impl IntoResponse {
    let id = next_id.fetch_add(1, Ordering::SeqCst).to_string();
    body["id"] = json!(id);
    // Lets tests provoke responses larger than the request
    if body["verbose"] == true {
        body["history"] = json!("x".repeat(4096));
    }
    (StatusCode::CREATED, Json(body))
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    Json(json!({ "ok": true }))
}

async fn list(Path(collection): Path<String>) -> Json<Value> {
    Json(json!({ "ok": true, "collection": collection, "items": [] }))
}

async fn update(Path((_collection, id)): Path<(String, String)>, Json(mut body): Json<Value>) -> impl IntoResponse {
    body["id"] = json!(id);
    Json(body)
}

async fn remove(Path((_collection, _id)): Path<(String, String)>) -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Start a CRUD-ish upstream on an ephemeral port.
pub async fn start_mock_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/slow", get(slow))
        .route("/api/{collection}", post(create).get(list))
        .route("/api/{collection}/{id}", put(update).patch(update).delete(remove))
        .fallback(|| async { Json(json!({ "ok": true })) })
        .with_state(Arc::new(AtomicU32::new(1)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub struct TestGateway {
    pub router: Router,
    pub core: Arc<SecurityCore>,
    pub registry: Arc<InMemoryIdentifierRegistry>,
    pub clock: ManualClock,
}

impl TestGateway {
    pub fn admin(&self) -> Router {
        setup_admin_router(AdminState::new(self.core.clone(), self.registry.clone(), ADMIN_KEY))
    }
}

/// A gateway in front of a fresh mock upstream. Client addresses come from
/// `X-Forwarded-For`.
pub async fn gateway_with(configure: impl FnOnce(&mut GuardConfig)) -> TestGateway {
    let upstream = start_mock_upstream().await;

    let mut config = GuardConfig::default();
    config.upstream.address = upstream.to_string();
    config.security.trust_forwarded_for = true;
    config.observability.metrics_enabled = false;
    configure(&mut config);

    let clock = ManualClock::default();
    let registry = Arc::new(InMemoryIdentifierRegistry::new());
    let core = Arc::new(
        SecurityCore::from_config(&config, registry.clone(), Arc::new(clock.clone())).unwrap(),
    );
    let router = GatewayServer::new(&config, core.clone(), registry.clone())
        .unwrap()
        .router();

    TestGateway {
        router,
        core,
        registry,
        clock,
    }
}

pub async fn gateway() -> TestGateway {
    gateway_with(|_| {}).await
}

pub fn request(method: &str, path: &str, ip: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", ip);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn login_request(ip: &str, email: &str, password: &str) -> Request<Body> {
    request(
        "POST",
        "/api/auth/login",
        ip,
        Some(json!({ "email": email, "password": password })),
    )
}

pub fn admin_request(method: &str, path: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Drive one request through `router`; the body is parsed as JSON when
/// there is one.
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}
