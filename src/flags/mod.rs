//! Feature flag evaluation.
//!
//! # Data Flow
//! ```text
//! RoutingDecisionPoint
//!     → FeatureFlagAggregator::decide(flag, tenant, ctx)
//!     → registry snapshot, ordered by weight
//!     → header overrides (weight 10, optional)
//!     → config flags (weight 1000)
//!     → any evaluators registered at wiring time
//! ```

pub mod aggregator;
pub mod config_evaluator;
pub mod evaluator;
pub mod header_evaluator;
pub mod registry;

pub use aggregator::{FeatureFlagAggregator, FlagDecision, FlagOutcome, AGGREGATOR_ID};
pub use config_evaluator::{ConfigFlagEvaluator, CONFIG_EVALUATOR_ID};
pub use evaluator::{FlagError, FlagEvaluator, RequestContext};
pub use header_evaluator::{HeaderFlagEvaluator, HEADER_EVALUATOR_ID};
pub use registry::{EvaluatorRegistration, EvaluatorRegistry};
