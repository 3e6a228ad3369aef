//! The flag evaluator capability.
//!
//! An evaluator answers "is flag X on?" for a tenant and request, or abstains.
//!
//! # Outcomes
//! - `Ok(value)`: authoritative decision, the chain stops here
//! - `Err(NoDecision)`: abstain, the chain continues
//! - `Err(EvaluatorFatal)`: the chain stops and the error reaches the caller
//! - any other `Err`: logged and treated as an abstention

use std::time::Instant;

use axum::http::{HeaderMap, Method};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum FlagError {
    #[error("no evaluator reached a decision")]
    NoDecision,

    #[error("fatal error from evaluator {}: {reason}", .evaluator.as_deref().unwrap_or("<unknown>"))]
    EvaluatorFatal {
        evaluator: Option<String>,
        reason: String,
    },

    #[error("evaluation of flag '{flag}' cancelled")]
    Cancelled { flag: String },

    #[error("evaluator error: {0}")]
    Evaluator(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FlagError {
    /// A fatal error that halts the chain.
    pub fn fatal(reason: impl Into<String>) -> Self {
        FlagError::EvaluatorFatal {
            evaluator: None,
            reason: reason.into(),
        }
    }

    /// A non-fatal error; the evaluator's opinion is discarded.
    pub fn other(reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        FlagError::Evaluator(reason.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FlagError::EvaluatorFatal { .. })
    }

    pub fn is_no_decision(&self) -> bool {
        matches!(self, FlagError::NoDecision)
    }
}

/// What an evaluator may look at besides the flag and tenant.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub deadline: Option<Instant>,
    pub cancellation: Option<CancellationToken>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            deadline: None,
            cancellation: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// True once the caller gave up or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Something that can decide feature flags.
///
/// Implementations are synchronous and must not block on unbounded I/O.
pub trait FlagEvaluator: Send + Sync {
    fn evaluate_flag(&self, flag: &str, tenant: Option<&str>, ctx: &RequestContext) -> Result<bool, FlagError>;

    /// Priority; lower weights are consulted first.
    fn weight(&self) -> i32;

    /// Evaluate, falling back to `default` on any error.
    fn evaluate_flag_with_default(
        &self,
        flag: &str,
        tenant: Option<&str>,
        ctx: &RequestContext,
        default: bool,
    ) -> bool {
        self.evaluate_flag(flag, tenant, ctx).unwrap_or(default)
    }
}
