//! Runtime assembly.
//!
//! # Responsibilities
//! - Turn a validated `ProxyConfig` into one runtime generation
//! - Install the built-in flag evaluators into the shared registry
//! - Initialize subsystems in dependency order
//!
//! # Design Decisions
//! - Fail fast: a config that does not resolve never replaces a running one
//! - The evaluator registry outlives generations; evaluators registered at
//!   wiring time survive reloads, built-ins are replaced
//! - Trackers start fresh on every generation

use std::sync::Arc;

use crate::config::{validate_config, ConfigError, ProxyConfig};
use crate::flags::{
    ConfigFlagEvaluator, EvaluatorRegistry, FeatureFlagAggregator, HeaderFlagEvaluator, CONFIG_EVALUATOR_ID,
    HEADER_EVALUATOR_ID,
};
use crate::load_balancer::BackendPool;
use crate::observability::EventBus;
use crate::routing::{RouteTable, RoutingDecisionPoint};

/// Everything derived from one configuration.
pub struct ProxyRuntime {
    pub config: Arc<ProxyConfig>,
    pub pool: Arc<BackendPool>,
    pub flags: Arc<FeatureFlagAggregator>,
    pub router: RoutingDecisionPoint,
}

impl ProxyRuntime {
    pub fn build(config: ProxyConfig, registry: &Arc<EvaluatorRegistry>, events: &EventBus) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let specs = config.resolve_backends()?;

        install_builtin_evaluators(&config, registry);

        let pool = Arc::new(BackendPool::new(specs, events));
        let flags = Arc::new(FeatureFlagAggregator::new(registry.clone(), events.clone()));
        let router = RoutingDecisionPoint::new(
            RouteTable::from_config(&config),
            pool.clone(),
            flags.clone(),
            &config.tenant_header,
            events.clone(),
        );

        tracing::info!(
            backends = pool.len(),
            routes = config.routes.len(),
            evaluators = registry.len(),
            "Runtime assembled"
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            flags,
            router,
        })
    }
}

fn install_builtin_evaluators(config: &ProxyConfig, registry: &EvaluatorRegistry) {
    let flags = &config.feature_flags;
    registry.register_with_weight(
        CONFIG_EVALUATOR_ID,
        flags.weight,
        Arc::new(ConfigFlagEvaluator::from_config(flags)),
    );

    let overrides = &flags.header_overrides;
    if overrides.enabled {
        registry.register_with_weight(
            HEADER_EVALUATOR_ID,
            overrides.weight,
            Arc::new(HeaderFlagEvaluator::from_config(overrides)),
        );
    } else {
        registry.unregister(HEADER_EVALUATOR_ID);
    }
}
