//! Per-request flag overrides carried in a header.
//!
//! ```text
//! x-feature-flags: new-checkout=on, beta-search=off
//! ```
//!
//! Accepted values: on/off, true/false, 1/0. Flags not mentioned abstain; a
//! malformed entry for the requested flag is a non-fatal error.

use crate::config::HeaderOverrideConfig;
use crate::flags::evaluator::{FlagError, FlagEvaluator, RequestContext};

pub const HEADER_EVALUATOR_ID: &str = "header";

#[derive(Debug, Clone)]
pub struct HeaderFlagEvaluator {
    header: String,
    weight: i32,
}

impl HeaderFlagEvaluator {
    pub fn new(header: impl Into<String>, weight: i32) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
            weight,
        }
    }

    pub fn from_config(config: &HeaderOverrideConfig) -> Self {
        Self::new(&config.header, config.weight)
    }
}

fn parse_value(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

impl FlagEvaluator for HeaderFlagEvaluator {
    fn evaluate_flag(&self, flag: &str, _tenant: Option<&str>, ctx: &RequestContext) -> Result<bool, FlagError> {
        let Some(raw) = ctx.header(&self.header) else {
            return Err(FlagError::NoDecision);
        };

        for entry in raw.split(',') {
            let Some((name, value)) = entry.split_once('=') else {
                continue;
            };
            if name.trim() != flag {
                continue;
            }
            return parse_value(value)
                .ok_or_else(|| FlagError::other(format!("invalid value '{}' for flag '{flag}'", value.trim())));
        }

        Err(FlagError::NoDecision)
    }

    fn weight(&self) -> i32 {
        self.weight
    }
}
