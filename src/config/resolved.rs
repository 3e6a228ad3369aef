//! Per-backend settings with global defaults and overrides already applied.
//!
//! Overrides are folded in once per (re)load so the probe loop and the request
//! path only ever read plain structs.

use std::collections::BTreeSet;
use std::time::Duration;

use url::Url;

use crate::config::schema::{CircuitBreakerConfig, ProxyConfig};
use crate::config::validation::ValidationError;

/// Effective health check settings for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub recent_request_threshold: Duration,
    pub expected_status_codes: BTreeSet<u16>,
    pub health_path: Option<String>,
}

/// Effective circuit breaker settings for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl From<&CircuitBreakerConfig> for CircuitSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            enabled: config.enabled,
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: Duration::from_millis(config.open_timeout_ms),
        }
    }
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

/// A backend with everything needed to probe and route to it.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    pub id: String,
    pub url: Url,
    pub health: HealthSettings,
    pub circuit: CircuitSettings,
}

impl BackendSpec {
    /// URL probed by the health checker.
    ///
    /// The health path is always relative to the backend's base path, the same
    /// way proxied request paths are, so `/health` on `http://h/base` checks
    /// `http://h/base/health`.
    pub fn probe_url(&self) -> Result<Url, url::ParseError> {
        match self.health.health_path.as_deref() {
            Some(path) if !path.is_empty() => {
                let base = self.url.path().trim_end_matches('/');
                self.url
                    .join(&format!("{base}/{}", path.trim_start_matches('/')))
            }
            _ => Ok(self.url.clone()),
        }
    }
}

impl ProxyConfig {
    /// Resolve every configured backend into a [`BackendSpec`], in config order.
    pub fn resolve_backends(&self) -> Result<Vec<BackendSpec>, ValidationError> {
        let global = &self.health_check;

        self.backends
            .iter()
            .map(|backend| {
                let url = Url::parse(&backend.url).map_err(|e| ValidationError::InvalidUrl {
                    backend: backend.id.clone(),
                    reason: e.to_string(),
                })?;

                let overrides = global.backend_health_check_config.get(&backend.id);
                let pick = |value: Option<u64>, fallback: u64| Duration::from_millis(value.unwrap_or(fallback));

                let health = HealthSettings {
                    enabled: overrides.and_then(|o| o.enabled).unwrap_or(global.enabled),
                    interval: pick(overrides.and_then(|o| o.interval_ms), global.interval_ms),
                    timeout: pick(overrides.and_then(|o| o.timeout_ms), global.timeout_ms),
                    recent_request_threshold: pick(
                        overrides.and_then(|o| o.recent_request_threshold_ms),
                        global.recent_request_threshold_ms,
                    ),
                    expected_status_codes: overrides
                        .and_then(|o| o.expected_status_codes.clone())
                        .unwrap_or_else(|| global.expected_status_codes.clone())
                        .into_iter()
                        .collect(),
                    health_path: overrides
                        .and_then(|o| o.health_endpoint.clone())
                        .or_else(|| global.health_endpoints.get(&backend.id).cloned()),
                };

                let circuit = self
                    .backend_circuit_breakers
                    .get(&backend.id)
                    .map(CircuitSettings::from)
                    .unwrap_or_else(|| CircuitSettings::from(&self.circuit_breaker_config));

                Ok(BackendSpec {
                    id: backend.id.clone(),
                    url,
                    health,
                    circuit,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, BackendHealthOverride};

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.backends.push(BackendConfig {
            id: "api".into(),
            url: "http://127.0.0.1:9001".into(),
        });
        config.backends.push(BackendConfig {
            id: "intermittent-api".into(),
            url: "http://127.0.0.1:9002/base/".into(),
        });
        config
    }

    #[test]
    fn test_globals_apply_without_overrides() {
        let specs = config().resolve_backends().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].id, "api");
        assert_eq!(specs[0].health.interval, Duration::from_secs(30));
        assert_eq!(specs[0].health.expected_status_codes, BTreeSet::from([200]));
        assert_eq!(specs[0].circuit.failure_threshold, 5);
        assert_eq!(specs[0].probe_url().unwrap().as_str(), "http://127.0.0.1:9001/");
    }

    #[test]
    fn test_backend_overrides_win() {
        let mut config = config();
        config.backend_circuit_breakers.insert(
            "intermittent-api".into(),
            CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 2,
                open_timeout_ms: 500,
            },
        );
        config.health_check.backend_health_check_config.insert(
            "intermittent-api".into(),
            BackendHealthOverride {
                interval_ms: Some(100),
                expected_status_codes: Some(vec![200, 204]),
                health_endpoint: Some("healthz".into()),
                ..Default::default()
            },
        );

        let specs = config.resolve_backends().unwrap();
        let flaky = &specs[1];
        assert_eq!(flaky.circuit.failure_threshold, 2);
        assert_eq!(flaky.circuit.open_timeout, Duration::from_millis(500));
        assert_eq!(flaky.health.interval, Duration::from_millis(100));
        assert_eq!(flaky.health.timeout, Duration::from_secs(5));
        assert!(flaky.health.expected_status_codes.contains(&204));
        assert_eq!(flaky.probe_url().unwrap().as_str(), "http://127.0.0.1:9002/base/healthz");

        // Untouched backend keeps the globals.
        assert_eq!(specs[0].circuit.failure_threshold, 5);
    }

    #[test]
    fn test_health_endpoints_map_sets_path() {
        let mut config = config();
        config
            .health_check
            .health_endpoints
            .insert("api".into(), "/status".into());
        let specs = config.resolve_backends().unwrap();
        assert_eq!(specs[0].probe_url().unwrap().as_str(), "http://127.0.0.1:9001/status");
    }

    #[test]
    fn test_absolute_health_path_keeps_base_path() {
        let mut config = config();
        config
            .health_check
            .health_endpoints
            .insert("intermittent-api".into(), "/health?deep=1".into());
        config.backends.push(BackendConfig {
            id: "no-slash".into(),
            url: "http://127.0.0.1:9003/svc".into(),
        });
        config
            .health_check
            .health_endpoints
            .insert("no-slash".into(), "/health".into());

        let specs = config.resolve_backends().unwrap();
        assert_eq!(
            specs[1].probe_url().unwrap().as_str(),
            "http://127.0.0.1:9002/base/health?deep=1"
        );
        assert_eq!(specs[2].probe_url().unwrap().as_str(), "http://127.0.0.1:9003/svc/health");
    }
}
