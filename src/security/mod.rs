//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (as a RequestDescriptor):
//!     → rate_limit.rs (general, strict or login window per client)
//!     → lockout.rs (failed-login counters per IP and identifier)
//!     → password.rs (strength rules on password-setting routes)
//!     → ssrf.rs (URL-bearing fields against the allowlist)
//!     → national_id.rs (CPF checksum and uniqueness on record writes)
//!     → Verdict returned to the host
//! ```
//!
//! # Design Decisions
//! - Fail closed: the first failing guard decides the verdict
//! - No trust in client input: verdicts are plain data, never errors
//! - All state lives in `core::SecurityCore`, shared by `Arc`

pub mod core;
pub mod lockout;
pub mod national_id;
pub mod password;
pub mod rate_limit;
pub mod request;
pub mod ssrf;

pub use self::core::SecurityCore;
pub use lockout::{AttemptKey, LockStatus, LockoutGuard, LockoutSettings, LockoutStats};
pub use national_id::{
    IdentifierLookup, InMemoryIdentifierRegistry, LookupError, LookupFailurePolicy,
    NationalIdError, NationalIdGuard, NationalIdRejection, SeedRecord,
};
pub use password::{check_strength, PasswordReport, PasswordRule};
pub use rate_limit::{RateDecision, RateLimiter, RatePolicy};
pub use request::{AcceptedNationalId, Denial, DenialCode, RequestDescriptor, Verdict};
pub use ssrf::{DomainError, SsrfGuard, UrlRejection, UrlVerdict, UrlViolation};
