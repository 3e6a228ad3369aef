//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up matching route for request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest path prefix wins; a host-bound route beats a hostless one of equal length
//! - Unmatched requests fall back to `default_backends` only when configured

use crate::config::{ProxyConfig, RouteConfig};
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher, RequestHead};

pub const DEFAULT_ROUTE: &str = "default";

/// A route ready for matching.
#[derive(Debug)]
pub struct CompiledRoute {
    pub name: String,
    pub backends: Vec<String>,
    pub feature_flag: Option<String>,
    pub flag_default: bool,
    pub alternative_backends: Vec<String>,
    prefix_len: usize,
    has_host: bool,
    matcher: AndMatcher,
}

impl CompiledRoute {
    pub fn compile(config: &RouteConfig) -> Self {
        let prefix = PathPrefixMatcher::new(config.path_prefix.clone());
        let prefix_len = prefix.len();
        let mut matchers: Vec<Box<dyn Matcher>> = vec![Box::new(prefix)];
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }

        Self {
            name: config.name.clone(),
            backends: config.backends.clone(),
            feature_flag: config.feature_flag.clone(),
            flag_default: config.flag_default,
            alternative_backends: config.alternative_backends.clone(),
            prefix_len,
            has_host: config.host.is_some(),
            matcher: AndMatcher::new(matchers),
        }
    }

    fn catch_all(backends: Vec<String>) -> Self {
        Self {
            name: DEFAULT_ROUTE.to_string(),
            backends,
            feature_flag: None,
            flag_default: true,
            alternative_backends: Vec::new(),
            prefix_len: 0,
            has_host: false,
            matcher: AndMatcher::new(Vec::new()),
        }
    }

    pub fn matches(&self, head: &RequestHead<'_>) -> bool {
        self.matcher.matches(head)
    }
}

#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
    fallback: Option<CompiledRoute>,
}

impl RouteTable {
    pub fn from_config(config: &ProxyConfig) -> Self {
        let mut routes: Vec<_> = config.routes.iter().map(CompiledRoute::compile).collect();
        // Stable: equal keys keep config order.
        routes.sort_by(|a, b| {
            b.prefix_len
                .cmp(&a.prefix_len)
                .then_with(|| b.has_host.cmp(&a.has_host))
        });

        let fallback = (!config.default_backends.is_empty())
            .then(|| CompiledRoute::catch_all(config.default_backends.clone()));

        tracing::debug!(routes = routes.len(), fallback = fallback.is_some(), "Route table compiled");
        Self { routes, fallback }
    }

    pub fn match_request(&self, head: &RequestHead<'_>) -> Option<&CompiledRoute> {
        self.routes
            .iter()
            .find(|route| route.matches(head))
            .or(self.fallback.as_ref())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
