//! Flags from the configuration file.
//!
//! Tenant values override global ones. Unknown flags abstain.

use std::collections::HashMap;

use crate::config::FeatureFlagsConfig;
use crate::flags::evaluator::{FlagError, FlagEvaluator, RequestContext};

pub const CONFIG_EVALUATOR_ID: &str = "config";

#[derive(Debug, Clone)]
pub struct ConfigFlagEvaluator {
    enabled: bool,
    weight: i32,
    flags: HashMap<String, bool>,
    tenants: HashMap<String, HashMap<String, bool>>,
}

impl ConfigFlagEvaluator {
    pub fn from_config(config: &FeatureFlagsConfig) -> Self {
        Self {
            enabled: config.enabled,
            weight: config.weight,
            flags: config.flags.clone(),
            tenants: config.tenants.clone(),
        }
    }
}

impl FlagEvaluator for ConfigFlagEvaluator {
    fn evaluate_flag(&self, flag: &str, tenant: Option<&str>, _ctx: &RequestContext) -> Result<bool, FlagError> {
        if !self.enabled {
            return Err(FlagError::NoDecision);
        }

        let tenant_value = tenant
            .and_then(|t| self.tenants.get(t))
            .and_then(|flags| flags.get(flag));

        tenant_value
            .or_else(|| self.flags.get(flag))
            .copied()
            .ok_or(FlagError::NoDecision)
    }

    fn weight(&self) -> i32 {
        self.weight
    }
}
