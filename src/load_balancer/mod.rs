//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → backend group identified (primary or alternative)
//!     → pool.rs (resolve ids to trackers)
//!     → round_robin.rs (rotate the group's candidate order)
//!     → routing decision point admits candidates in that order
//! ```
//!
//! # Design Decisions
//! - The balancer only orders candidates; the circuit breaker decides admission
//! - One rotation counter per backend group
//! - Trackers live exactly as long as one config generation

use std::sync::Arc;

use crate::health::BackendHealthTracker;

pub mod pool;
pub mod round_robin;

pub use pool::BackendPool;
pub use round_robin::RoundRobin;

/// Orders a group's backends for one request.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn order(&self, backends: &[Arc<BackendHealthTracker>]) -> Vec<Arc<BackendHealthTracker>>;
}
