//! Service-wide health summary.
//!
//! Pure functions over tracker snapshots. Safe to call on every endpoint hit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::health::tracker::{BackendHealthReport, BackendHealthTracker};

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub healthy: bool,
    pub total_backends: usize,
    pub healthy_backends: usize,
    pub unhealthy_backends: usize,
    pub circuit_open_count: usize,
    pub last_check: DateTime<Utc>,
}

/// Body of `GET /metrics/reverseproxy/health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedHealth {
    #[serde(flatten)]
    pub summary: HealthSummary,
    pub backend_details: BTreeMap<String, BackendHealthReport>,
}

pub struct HealthAggregator;

impl HealthAggregator {
    pub fn aggregate(trackers: &[Arc<BackendHealthTracker>]) -> DetailedHealth {
        let reports = trackers.iter().map(|t| t.snapshot()).collect();
        aggregate_reports(reports, Utc::now())
    }

    pub fn summary(trackers: &[Arc<BackendHealthTracker>]) -> HealthSummary {
        Self::aggregate(trackers).summary
    }
}

/// Fold backend reports into a summary. `now` is used as `last_check` when no
/// backend has been probed yet.
pub fn aggregate_reports(reports: Vec<BackendHealthReport>, now: DateTime<Utc>) -> DetailedHealth {
    let total_backends = reports.len();
    let healthy_backends = reports.iter().filter(|r| r.healthy).count();
    let circuit_open_count = reports.iter().filter(|r| r.circuit_breaker_open).count();
    let last_check = reports.iter().filter_map(|r| r.last_check).max().unwrap_or(now);

    let unhealthy_backends = total_backends - healthy_backends;
    let summary = HealthSummary {
        healthy: unhealthy_backends == 0,
        total_backends,
        healthy_backends,
        unhealthy_backends,
        circuit_open_count,
        last_check,
    };

    let backend_details = reports
        .into_iter()
        .map(|report| (report.backend_id.clone(), report))
        .collect();

    DetailedHealth {
        summary,
        backend_details,
    }
}
