//! Request-security gateway for the school portal API.

pub mod admin;
pub mod audit;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GuardConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use security::SecurityCore;
