//! Audit subsystem.
//!
//! # Data Flow
//! ```text
//! Guards / handlers build an AuditEntry
//!     → trail.rs (stamp time, mask details, append, evict oldest)
//!     → tracing side channel (warn and above)
//!
//! Admin API:
//!     → trail.rs query (filters, most recent first)
//!
//! Maintenance task:
//!     → trail.rs sweep (age-based retention)
//! ```

pub mod event;
pub mod masking;
pub mod trail;

pub use event::{AuditCategory, AuditEntry, AuditEvent, AuditLevel};
pub use masking::{Masker, REDACTED};
pub use trail::{AuditFilter, AuditSummary, AuditTrail};
