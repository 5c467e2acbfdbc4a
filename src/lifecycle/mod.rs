//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging/metrics → SecurityCore → Start listeners
//!
//! Background (maintenance.rs):
//!     Periodic sweeps of rate windows, lockout records and audit retention
//!
//! Shutdown (shutdown.rs):
//!     Signal received (signals.rs) → Stop accepting → Drain connections
//!     → Stop sweeps → Exit
//! ```

pub mod maintenance;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use maintenance::MaintenanceHandle;
pub use shutdown::Shutdown;
