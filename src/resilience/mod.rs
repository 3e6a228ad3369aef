//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (admit / deny, no network call when open)
//!     → upstream call under the upstream timeout
//!     → retries.rs (classify outcome, fail over if the method allows it)
//!     → circuit_breaker.rs (record outcome)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Failover only for idempotent requests
//! - Circuit breaker prevents cascading failures

pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitSnapshot, CircuitState, Transition};
