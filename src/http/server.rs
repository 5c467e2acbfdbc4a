//! Gateway server setup.
//!
//! # Responsibilities
//! - Create the Axum router with the security middleware in front of a
//!   catch-all forwarding handler
//! - Wire up ambient layers (request ID, tracing, timeout)
//! - Forward allowed requests to the upstream CRUD service
//! - Drain connections on shutdown

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{self, HeaderValue},
        uri::{Authority, InvalidUri, Scheme},
        StatusCode, Uri,
    },
    middleware,
    response::Response,
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GuardConfig;
use crate::http::middleware::security_middleware;
use crate::http::request::{
    client_ip, propagate_request_id_layer, set_request_id_layer, RequestIdExt, X_REQUEST_ID,
};
use crate::http::response::error_response;
use crate::security::{InMemoryIdentifierRegistry, SecurityCore};

/// State shared by the middleware and the forwarding handler.
#[derive(Clone)]
pub struct GatewayState {
    pub core: Arc<SecurityCore>,
    pub registry: Arc<InMemoryIdentifierRegistry>,
    pub client: Client<HttpConnector, Body>,
    pub upstream: Authority,
    pub max_body_size: usize,
    pub trust_forwarded_for: bool,
}

/// HTTP front for the security core.
pub struct GatewayServer {
    router: Router,
    upstream: Authority,
}

impl GatewayServer {
    pub fn new(
        config: &GuardConfig,
        core: Arc<SecurityCore>,
        registry: Arc<InMemoryIdentifierRegistry>,
    ) -> Result<Self, InvalidUri> {
        let upstream = Authority::from_str(&config.upstream.address)?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let state = GatewayState {
            core,
            registry,
            client,
            upstream: upstream.clone(),
            max_body_size: config.security.max_body_size,
            trust_forwarded_for: config.security.trust_forwarded_for,
        };

        Ok(Self {
            router: Self::build_router(config, state),
            upstream,
        })
    }

    fn build_router(config: &GuardConfig, state: GatewayState) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .layer(middleware::from_fn_with_state(state.clone(), security_middleware))
            .with_state(state)
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(config.timeouts.request_secs),
            ))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The fully layered router, for serving or for driving in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until the shutdown signal fires, then drain connections.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, upstream = %self.upstream, "Gateway listening");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Forward an allowed request to the upstream service.
async fn proxy_handler(State(state): State<GatewayState>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();
    let request_id = parts.request_id().to_string();
    let client = client_ip(&parts, state.trust_forwarded_for);

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(state.upstream.clone());
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream URI");
            return error_response(StatusCode::BAD_GATEWAY, "upstream_error", "Upstream request failed");
        }
    };

    if let Ok(host) = HeaderValue::from_str(state.upstream.as_str()) {
        parts.headers.insert(header::HOST, host);
    }
    if let Ok(forwarded) = HeaderValue::from_str(&client) {
        parts.headers.insert("x-forwarded-for", forwarded);
    }
    if let Ok(id) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(X_REQUEST_ID, id);
    }

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        uri = %parts.uri,
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            error_response(StatusCode::BAD_GATEWAY, "upstream_unavailable", "Upstream request failed")
        }
    }
}
