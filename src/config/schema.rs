//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Durations are plain integers with their unit in the field name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream backend definitions.
    pub backends: Vec<BackendConfig>,

    /// Route definitions mapping requests to backends.
    pub routes: Vec<RouteConfig>,

    /// Backends used when no route matches. Empty means unmatched requests get a 404.
    pub default_backends: Vec<String>,

    /// Global health check settings plus per-backend overrides.
    pub health_check: HealthCheckConfig,

    /// Global circuit breaker settings.
    pub circuit_breaker_config: CircuitBreakerConfig,

    /// Per-backend circuit breaker settings, replacing the global block for that backend.
    pub backend_circuit_breakers: HashMap<String, CircuitBreakerConfig>,

    /// Feature flag settings for the built-in evaluators.
    pub feature_flags: FeatureFlagsConfig,

    /// Header carrying the tenant identifier.
    pub tenant_header: String,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            backends: Vec::new(),
            routes: Vec::new(),
            default_backends: Vec::new(),
            health_check: HealthCheckConfig::default(),
            circuit_breaker_config: CircuitBreakerConfig::default(),
            backend_circuit_breakers: HashMap::new(),
            feature_flags: FeatureFlagsConfig::default(),
            tenant_header: "x-tenant-id".to_string(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body buffered for forwarding, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub id: String,

    /// Base URL of the backend (e.g., "http://127.0.0.1:3000").
    pub url: String,
}

/// Route configuration mapping requests to backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Path prefix to match.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Host header to match (exact, case-insensitive).
    #[serde(default)]
    pub host: Option<String>,

    /// Backends serving this route, in preference order.
    pub backends: Vec<String>,

    /// Flag gating the primary backends.
    #[serde(default)]
    pub feature_flag: Option<String>,

    /// Value assumed when no evaluator decides the flag.
    #[serde(default = "default_flag_value")]
    pub flag_default: bool,

    /// Backends used while the flag is off.
    #[serde(default)]
    pub alternative_backends: Vec<String>,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_flag_value() -> bool {
    true
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable scheduled health probes.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Per-probe deadline in milliseconds (DNS + HTTP).
    pub timeout_ms: u64,

    /// Skip a probe when live traffic reached the backend within this window.
    pub recent_request_threshold_ms: u64,

    /// Status codes counted as a passing probe.
    pub expected_status_codes: Vec<u16>,

    /// Health path per backend id. Backends without an entry are probed at their root.
    pub health_endpoints: HashMap<String, String>,

    /// Per-backend overrides of the global settings.
    pub backend_health_check_config: HashMap<String, BackendHealthOverride>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            recent_request_threshold_ms: 60_000,
            expected_status_codes: vec![200],
            health_endpoints: HashMap::new(),
            backend_health_check_config: HashMap::new(),
        }
    }
}

/// Per-backend health check override. Unset fields inherit the global value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendHealthOverride {
    pub enabled: Option<bool>,
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub recent_request_threshold_ms: Option<u64>,
    pub expected_status_codes: Option<Vec<u16>>,
    pub health_endpoint: Option<String>,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker. A disabled breaker admits everything.
    pub enabled: bool,

    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial is allowed, in milliseconds.
    pub open_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            open_timeout_ms: 30_000,
        }
    }
}

/// Feature flag configuration for the built-in evaluators.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureFlagsConfig {
    /// Enable the configuration-backed evaluator.
    pub enabled: bool,

    /// Priority of the configuration-backed evaluator (lower runs first).
    pub weight: i32,

    /// Global flag values.
    pub flags: HashMap<String, bool>,

    /// Tenant-specific flag values, overriding the global ones.
    pub tenants: HashMap<String, HashMap<String, bool>>,

    /// Request-header override evaluator.
    pub header_overrides: HeaderOverrideConfig,
}

impl Default for FeatureFlagsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1000,
            flags: HashMap::new(),
            tenants: HashMap::new(),
            header_overrides: HeaderOverrideConfig::default(),
        }
    }
}

/// Settings for flag overrides carried in a request header.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderOverrideConfig {
    pub enabled: bool,
    pub header: String,
    pub weight: i32,
}

impl Default for HeaderOverrideConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header: "x-feature-flags".to_string(),
            weight: 10,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Deadline for a single upstream attempt in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            upstream_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Capacity of the event queue feeding the observer task.
    pub event_buffer: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            event_buffer: 1024,
        }
    }
}
