//! Active health probe.
//!
//! # Responsibilities
//! - Resolve the backend host (no connection attempt if that fails)
//! - GET the health path within the configured deadline
//! - Classify the outcome; failures are data, never errors to the caller
//!
//! The deadline covers DNS and HTTP together.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::time;

use crate::config::BackendSpec;

/// Why a probe failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("DNS resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("health check timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status code {0}")]
    UnexpectedStatus(u16),

    #[error("invalid health check request: {0}")]
    InvalidRequest(String),
}

impl ProbeError {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeError::Dns { .. } => "dns",
            ProbeError::Connect(_) => "connect",
            ProbeError::Timeout(_) => "timeout",
            ProbeError::UnexpectedStatus(_) => "status",
            ProbeError::InvalidRequest(_) => "invalid",
        }
    }
}

/// Verdict of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub success: bool,
    pub dns_resolved: bool,
    pub resolved_ips: Vec<String>,
    pub response_time: Duration,
    pub status_code: Option<u16>,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn passed(resolved_ips: Vec<String>, response_time: Duration, status: u16) -> Self {
        Self {
            success: true,
            dns_resolved: true,
            resolved_ips,
            response_time,
            status_code: Some(status),
            error: None,
        }
    }

    pub fn failed(
        dns_resolved: bool,
        resolved_ips: Vec<String>,
        response_time: Duration,
        status_code: Option<u16>,
        error: ProbeError,
    ) -> Self {
        Self {
            success: false,
            dns_resolved,
            resolved_ips,
            response_time,
            status_code,
            error: Some(error),
        }
    }
}

/// Performs DNS + HTTP checks against backends.
#[derive(Clone)]
pub struct HealthProbe {
    client: Client<HttpConnector, Body>,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpConnector::new());
        Self { client }
    }

    pub async fn probe(&self, backend: &BackendSpec) -> ProbeResult {
        let start = Instant::now();
        let deadline = backend.health.timeout;

        let ips = match self.resolve(backend, deadline).await {
            Ok(ips) => ips,
            Err(error) => {
                tracing::debug!(backend = %backend.id, error = %error, "Health check DNS failure");
                return ProbeResult::failed(false, Vec::new(), start.elapsed(), None, error);
            }
        };

        let url = match backend.probe_url() {
            Ok(url) => url,
            Err(e) => {
                let error = ProbeError::InvalidRequest(e.to_string());
                return ProbeResult::failed(true, ip_strings(&ips), start.elapsed(), None, error);
            }
        };
        let host_header = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_string(),
        };

        // Connect only to the addresses just resolved, in order, so the reported
        // IPs are the ones actually checked.
        let remaining = deadline.saturating_sub(start.elapsed());
        let attempt = time::timeout(remaining, async {
            let mut last_error = ProbeError::Connect("no address attempted".to_string());
            for ip in &ips {
                let mut target = url.clone();
                if target.set_ip_host(*ip).is_err() {
                    return Err(ProbeError::InvalidRequest(format!("cannot address {ip}")));
                }
                let request = Request::builder()
                    .method("GET")
                    .uri(target.as_str())
                    .header("host", host_header.as_str())
                    .header("user-agent", "routeguard-health-check")
                    .body(Body::empty())
                    .map_err(|e| ProbeError::InvalidRequest(e.to_string()))?;

                match self.client.request(request).await {
                    Ok(response) => return Ok(response.status().as_u16()),
                    Err(e) => {
                        tracing::trace!(backend = %backend.id, %ip, error = %e, "Health check address unreachable");
                        last_error = ProbeError::Connect(e.to_string());
                    }
                }
            }
            Err(last_error)
        })
        .await;

        let resolved_ips = ip_strings(&ips);
        match attempt {
            Ok(Ok(status)) => {
                let elapsed = start.elapsed();
                if backend.health.expected_status_codes.contains(&status) {
                    ProbeResult::passed(resolved_ips, elapsed, status)
                } else {
                    tracing::debug!(backend = %backend.id, status, "Health check failed: unexpected status");
                    ProbeResult::failed(true, resolved_ips, elapsed, Some(status), ProbeError::UnexpectedStatus(status))
                }
            }
            Ok(Err(error)) => {
                tracing::debug!(backend = %backend.id, error = %error, "Health check failed: connection error");
                ProbeResult::failed(true, resolved_ips, start.elapsed(), None, error)
            }
            Err(_) => {
                tracing::debug!(backend = %backend.id, "Health check failed: timeout");
                ProbeResult::failed(true, resolved_ips, start.elapsed(), None, ProbeError::Timeout(deadline))
            }
        }
    }

    async fn resolve(&self, backend: &BackendSpec, deadline: Duration) -> Result<Vec<IpAddr>, ProbeError> {
        let host = backend
            .url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_default();
        let port = backend.url.port_or_known_default().unwrap_or(80);

        let dns_error = |reason: String| ProbeError::Dns {
            host: host.clone(),
            reason,
        };

        if host.is_empty() {
            return Err(dns_error("missing host".to_string()));
        }

        let addrs = match time::timeout(deadline, tokio::net::lookup_host((host.as_str(), port))).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => return Err(dns_error(e.to_string())),
            Err(_) => return Err(dns_error(format!("lookup exceeded {deadline:?}"))),
        };

        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        if ips.is_empty() {
            return Err(dns_error("no addresses returned".to_string()));
        }
        Ok(ips)
    }
}

fn ip_strings(ips: &[IpAddr]) -> Vec<String> {
    ips.iter().map(IpAddr::to_string).collect()
}
