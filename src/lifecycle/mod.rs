//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Assemble runtime → Start probes → Start listener
//!
//! Reload:
//!     Watcher delivers config → Assemble new runtime → Swap → Restart probes
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Stop accepting → Stop probes → Drain events → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - A rejected reload keeps the running generation untouched

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::ProxyRuntime;
