//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Scheduled probing (scheduler.rs):
//!     Per-backend timer
//!     → tracker.rs decides probe / skip
//!     → probe.rs (DNS, then HTTP GET)
//!     → circuit breaker + published probe state
//!
//! Live traffic (routing):
//!     Request outcome
//!     → tracker.rs record_live_outcome
//!     → circuit breaker
//!
//! Reporting (aggregate.rs):
//!     Tracker snapshots → HealthSummary / DetailedHealth
//! ```
//!
//! # Design Decisions
//! - Health state is per-backend, owned by exactly one tracker
//! - Probe failures are data; the scheduler never stops on them
//! - Readers only ever see published snapshots

pub mod aggregate;
pub mod probe;
pub mod scheduler;
pub mod tracker;

pub use aggregate::{DetailedHealth, HealthAggregator, HealthSummary};
pub use probe::{HealthProbe, ProbeError, ProbeResult};
pub use scheduler::ProbeTasks;
pub use tracker::{BackendHealthReport, BackendHealthTracker, BackendLease, TickOutcome};
