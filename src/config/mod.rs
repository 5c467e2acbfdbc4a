//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → SecurityCore / GatewayServer built from it at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → allowed-domain set replaced in the running SSRF guard
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Only the SSRF allowlist is hot-reloaded; everything else needs a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use validation::{validate_config, ValidationError};
pub use schema::{
    AdminConfig, AuditConfig, AuthConfig, GuardConfig, ListenerConfig, LockoutConfig, LogFormat,
    NationalIdConfig, ObservabilityConfig, RateLimitConfig, RatePolicyConfig, RecordRouteConfig,
    SecurityConfig, SsrfConfig, TimeoutConfig, UpstreamConfig,
};
