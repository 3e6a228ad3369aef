//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → decision.rs (feature flag, backend group, breaker admission, failover)
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile matchers
//!     → Sort by specificity
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled once per config generation, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod decision;
pub mod matcher;
pub mod router;

pub use decision::{Attempt, BackendGroup, RouteError, RoutePlan, RoutingDecisionPoint};
pub use matcher::RequestHead;
pub use router::{CompiledRoute, RouteTable};
