//! Per-request routing decisions.
//!
//! # Data Flow
//! ```text
//! request head + context
//!     → RouteTable match                       (none → NoRoute)
//!     → route flag via FeatureFlagAggregator   (fatal/cancelled → Flag)
//!     → primary or alternative group           (flag off, no alternative → RouteDisabled)
//!     → round-robin candidate order
//!     → for each candidate: breaker admission  (denied → skip, no network call)
//!         → attempt → outcome reported through the lease
//!     → nothing admitted or all failed → NoHealthyBackend
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::flags::{FeatureFlagAggregator, FlagDecision, FlagError, RequestContext};
use crate::health::BackendHealthTracker;
use crate::load_balancer::BackendPool;
use crate::observability::{EventBus, ProxyEvent};
use crate::routing::matcher::RequestHead;
use crate::routing::router::{CompiledRoute, RouteTable};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no route matches {path}")]
    NoRoute { path: String },

    #[error("route '{route}' is disabled by its feature flag")]
    RouteDisabled { route: String },

    #[error("no healthy backend available for route '{route}'")]
    NoHealthyBackend { route: String },

    #[error("upstream {backend} failed: {reason}")]
    Upstream { backend: String, reason: String },

    #[error("upstream {backend} timed out after {timeout:?}")]
    UpstreamTimeout { backend: String, timeout: Duration },

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("feature flag evaluation failed: {0}")]
    Flag(#[from] FlagError),
}

/// Which backend group a plan draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendGroup {
    Primary,
    Alternative,
}

impl BackendGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendGroup::Primary => "primary",
            BackendGroup::Alternative => "alternative",
        }
    }
}

/// Where a request may go, in attempt order.
#[derive(Debug)]
pub struct RoutePlan {
    pub route: String,
    pub group: BackendGroup,
    pub tenant: Option<String>,
    pub flag: Option<FlagDecision>,
    pub candidates: Vec<Arc<BackendHealthTracker>>,
}

/// Outcome of one attempt against one backend.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    /// The backend answered, but the answer counts against it (5xx).
    /// Returned to the caller only if no later attempt succeeds.
    Degraded(T),
    Failure(RouteError),
}

pub struct RoutingDecisionPoint {
    table: RouteTable,
    pool: Arc<BackendPool>,
    flags: Arc<FeatureFlagAggregator>,
    tenant_header: String,
    events: EventBus,
}

impl RoutingDecisionPoint {
    pub fn new(
        table: RouteTable,
        pool: Arc<BackendPool>,
        flags: Arc<FeatureFlagAggregator>,
        tenant_header: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            table,
            pool,
            flags,
            tenant_header: tenant_header.into().to_ascii_lowercase(),
            events,
        }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn flags(&self) -> &Arc<FeatureFlagAggregator> {
        &self.flags
    }

    /// Tenant id from the configured header, if present and non-empty.
    pub fn tenant<'a>(&self, ctx: &'a RequestContext) -> Option<&'a str> {
        ctx.header(&self.tenant_header)
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Pick the route and backend group for a request.
    pub fn plan(&self, host: Option<&str>, ctx: &RequestContext) -> Result<RoutePlan, RouteError> {
        let head = RequestHead { host, path: &ctx.path };
        let route = self
            .table
            .match_request(&head)
            .ok_or_else(|| RouteError::NoRoute { path: ctx.path.clone() })?;

        let tenant = self.tenant(ctx);
        let (group, flag) = self.select_group(route, tenant, ctx)?;

        let ids = match group {
            BackendGroup::Primary => &route.backends,
            BackendGroup::Alternative => &route.alternative_backends,
        };
        let key = format!("{}:{}", route.name, group.as_str());
        let candidates = self.pool.candidates(&key, ids);

        tracing::debug!(
            route = %route.name,
            group = group.as_str(),
            tenant = ?tenant,
            candidates = candidates.len(),
            "Route planned"
        );

        Ok(RoutePlan {
            route: route.name.clone(),
            group,
            tenant: tenant.map(String::from),
            flag,
            candidates,
        })
    }

    fn select_group(
        &self,
        route: &CompiledRoute,
        tenant: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<(BackendGroup, Option<FlagDecision>), RouteError> {
        let Some(flag) = &route.feature_flag else {
            return Ok((BackendGroup::Primary, None));
        };

        let decision = self.flags.decide(flag, tenant, ctx)?;
        if decision.value_or(route.flag_default) {
            return Ok((BackendGroup::Primary, Some(decision)));
        }
        if route.alternative_backends.is_empty() {
            return Err(RouteError::RouteDisabled {
                route: route.name.clone(),
            });
        }
        Ok((BackendGroup::Alternative, Some(decision)))
    }

    /// Try candidates in order until one succeeds.
    ///
    /// Open circuits are skipped without a network call. Each admitted attempt
    /// reports its outcome to the backend's breaker. If nothing succeeds, the last
    /// degraded answer wins; failing that, a spent attempt budget returns the last
    /// attempt's error and plain exhaustion yields `NoHealthyBackend`.
    pub async fn execute<T, F, Fut>(&self, plan: &RoutePlan, max_attempts: usize, mut attempt: F) -> Result<T, RouteError>
    where
        F: FnMut(Arc<BackendHealthTracker>) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut attempts = 0;
        let mut last_error = None;
        let mut budget_spent = false;
        let mut degraded = None;

        for tracker in &plan.candidates {
            if attempts >= max_attempts {
                budget_spent = true;
                break;
            }
            let Some(lease) = tracker.acquire() else {
                tracing::debug!(route = %plan.route, backend = %tracker.id(), "Circuit open, skipping backend");
                continue;
            };
            attempts += 1;

            match attempt(tracker.clone()).await {
                Attempt::Success(value) => {
                    lease.complete(true);
                    return Ok(value);
                }
                Attempt::Degraded(value) => {
                    tracing::warn!(
                        route = %plan.route,
                        backend = %tracker.id(),
                        attempt = attempts,
                        "Backend answered with a server error"
                    );
                    lease.complete(false);
                    degraded = Some(value);
                }
                Attempt::Failure(error) => {
                    tracing::warn!(
                        route = %plan.route,
                        backend = %tracker.id(),
                        attempt = attempts,
                        error = %error,
                        "Backend attempt failed"
                    );
                    lease.complete(false);
                    last_error = Some(error);
                }
            }
        }

        if let Some(value) = degraded {
            return Ok(value);
        }
        match last_error {
            Some(error) if budget_spent => Err(error),
            _ => {
                self.events.publish(ProxyEvent::NoHealthyBackend {
                    route: plan.route.clone(),
                });
                Err(RouteError::NoHealthyBackend {
                    route: plan.route.clone(),
                })
            }
        }
    }
}
