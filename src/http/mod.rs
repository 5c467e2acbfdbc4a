//! HTTP gateway subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → middleware.rs (buffer body, evaluate, render denials)
//!     → request.rs (client address, descriptor for the guards)
//!     → server.rs proxy_handler (forward to the upstream service)
//!     → response.rs (rate headers, JSON errors)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{GatewayServer, GatewayState};
