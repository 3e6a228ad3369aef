//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes and overrides reference existing backends)
//! - Validate value ranges (thresholds >= 1, intervals > 0, status codes)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("backend id must not be empty")]
    EmptyBackendId,

    #[error("duplicate backend id '{0}'")]
    DuplicateBackend(String),

    #[error("backend '{backend}' has an invalid url: {reason}")]
    InvalidUrl { backend: String, reason: String },

    #[error("{context} references unknown backend '{backend}'")]
    UnknownBackend { context: String, backend: String },

    #[error("route '{0}' has no backends")]
    EmptyRoute(String),

    #[error("{context}: failure_threshold must be at least 1")]
    FailureThreshold { context: String },

    #[error("{context}: {field} must be greater than zero")]
    ZeroDuration { context: String, field: &'static str },

    #[error("{context}: status code {code} is not a valid HTTP status")]
    InvalidStatusCode { context: String, code: u16 },

    #[error("{context}: expected_status_codes must not be empty")]
    NoExpectedStatus { context: String },
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut ids = HashSet::new();

    for backend in &config.backends {
        if backend.id.is_empty() {
            errors.push(ValidationError::EmptyBackendId);
        } else if !ids.insert(backend.id.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.id.clone()));
        }

        if let Err(reason) = check_url(&backend.url) {
            errors.push(ValidationError::InvalidUrl {
                backend: backend.id.clone(),
                reason,
            });
        }
    }

    let require = |context: String, backend: &String, errors: &mut Vec<ValidationError>| {
        if !ids.contains(backend.as_str()) {
            errors.push(ValidationError::UnknownBackend {
                context,
                backend: backend.clone(),
            });
        }
    };

    for route in &config.routes {
        if route.backends.is_empty() {
            errors.push(ValidationError::EmptyRoute(route.name.clone()));
        }
        for backend in route.backends.iter().chain(&route.alternative_backends) {
            require(format!("route '{}'", route.name), backend, &mut errors);
        }
    }
    for backend in &config.default_backends {
        require("default_backends".to_string(), backend, &mut errors);
    }
    for backend in config.health_check.backend_health_check_config.keys() {
        require("backend_health_check_config".to_string(), backend, &mut errors);
    }
    for backend in config.health_check.health_endpoints.keys() {
        require("health_endpoints".to_string(), backend, &mut errors);
    }
    for backend in config.backend_circuit_breakers.keys() {
        require("backend_circuit_breakers".to_string(), backend, &mut errors);
    }

    let health = &config.health_check;
    check_health_values(
        "health_check",
        Some(health.interval_ms),
        Some(health.timeout_ms),
        Some(&health.expected_status_codes),
        &mut errors,
    );
    for (backend, o) in &health.backend_health_check_config {
        check_health_values(
            &format!("health_check.backend_health_check_config.{backend}"),
            o.interval_ms,
            o.timeout_ms,
            o.expected_status_codes.as_ref(),
            &mut errors,
        );
    }

    if config.circuit_breaker_config.failure_threshold == 0 {
        errors.push(ValidationError::FailureThreshold {
            context: "circuit_breaker_config".to_string(),
        });
    }
    for (backend, breaker) in &config.backend_circuit_breakers {
        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::FailureThreshold {
                context: format!("backend_circuit_breakers.{backend}"),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(())
}

fn check_health_values(
    context: &str,
    interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
    codes: Option<&Vec<u16>>,
    errors: &mut Vec<ValidationError>,
) {
    for (field, value) in [("interval_ms", interval_ms), ("timeout_ms", timeout_ms)] {
        if value == Some(0) {
            errors.push(ValidationError::ZeroDuration {
                context: context.to_string(),
                field,
            });
        }
    }
    if let Some(codes) = codes {
        if codes.is_empty() {
            errors.push(ValidationError::NoExpectedStatus {
                context: context.to_string(),
            });
        }
        for &code in codes {
            if !(100..=599).contains(&code) {
                errors.push(ValidationError::InvalidStatusCode {
                    context: context.to_string(),
                    code,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, CircuitBreakerConfig, RouteConfig};

    fn backend(id: &str, url: &str) -> BackendConfig {
        BackendConfig {
            id: id.into(),
            url: url.into(),
        }
    }

    fn route(name: &str, backends: &[&str]) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: "/".into(),
            host: None,
            backends: backends.iter().map(|b| b.to_string()).collect(),
            feature_flag: None,
            flag_default: true,
            alternative_backends: Vec::new(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let mut config = ProxyConfig::default();
        config.backends.push(backend("a", "http://127.0.0.1:8001"));
        config.routes.push(route("r", &["a"]));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ProxyConfig::default();
        config.backends.push(backend("a", "http://127.0.0.1:8001"));
        config.backends.push(backend("a", "https://127.0.0.1:8002"));
        config.routes.push(route("r", &["missing"]));
        config.circuit_breaker_config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        config.health_check.interval_ms = 0;
        config.health_check.expected_status_codes = vec![200, 42];

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateBackend("a".into())));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidUrl { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownBackend { backend, .. } if backend == "missing")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::FailureThreshold { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroDuration { field: "interval_ms", .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidStatusCode { code: 42, .. })));
    }

    #[test]
    fn test_override_for_unknown_backend_rejected() {
        let mut config = ProxyConfig::default();
        config.backends.push(backend("a", "http://127.0.0.1:8001"));
        config
            .backend_circuit_breakers
            .insert("ghost".into(), CircuitBreakerConfig::default());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "backend_circuit_breakers references unknown backend 'ghost'"
        );
    }
}
