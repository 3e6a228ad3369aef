//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!     → events.rs (health/circuit/flag events, delivered by one observer task)
//!
//! Consumers:
//!     → Log aggregation (stdout, optionally JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → EventObserver sinks attached at startup
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments)
//! - Event publication never blocks the request path

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventBus, EventDispatcher, EventObserver, ProxyEvent};
