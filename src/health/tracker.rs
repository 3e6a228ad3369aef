//! Per-backend health tracking.
//!
//! # Responsibilities
//! - Own the backend's circuit breaker and its published probe state
//! - Decide whether a scheduled tick probes or skips
//! - Feed probe results and live request outcomes into the breaker
//! - Hand out consistent snapshots to the health endpoints and the router
//!
//! # Design Decisions
//! - Probe state is published through `ArcSwap`; readers never wait on the prober
//! - The prober never holds the breaker lock across network I/O
//! - Recent live traffic only suppresses probes while the circuit is closed,
//!   so an open circuit always recovers through a synthetic trial probe
//! - `healthy` = last probe passed && circuit not open

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::config::BackendSpec;
use crate::health::probe::{HealthProbe, ProbeResult};
use crate::observability::{metrics, EventBus, ProxyEvent};
use crate::resilience::circuit_breaker::{Admission, CircuitBreaker, CircuitState, Transition};

/// Read-only view of one backend, shaped for the detailed health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendHealthReport {
    pub backend_id: String,
    pub url: String,
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Serialized as integer nanoseconds.
    #[serde(serialize_with = "duration_nanos")]
    pub response_time: Duration,
    pub dns_resolved: bool,
    pub resolved_ips: Vec<String>,
    pub circuit_breaker_open: bool,
    pub circuit_breaker_state: CircuitState,
    pub circuit_failure_count: u32,
}

fn duration_nanos<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_nanos()).unwrap_or(u64::MAX))
}

/// What a scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Probed { success: bool },
    SkippedRecentTraffic,
    SkippedCircuitOpen,
    Disabled,
}

/// Probe-derived state, replaced wholesale after every probe.
#[derive(Debug, Clone, Default)]
struct ProbeState {
    probe_ok: bool,
    last_check: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    response_time: Duration,
    dns_resolved: bool,
    resolved_ips: Vec<String>,
    last_error: Option<String>,
}

/// Owns the health state and circuit breaker of a single backend.
#[derive(Debug)]
pub struct BackendHealthTracker {
    spec: BackendSpec,
    breaker: CircuitBreaker,
    probe_state: ArcSwap<ProbeState>,
    /// Milliseconds after `epoch` of the last live request, plus one. Zero means never.
    last_request: AtomicU64,
    epoch: Instant,
    reported_healthy: AtomicBool,
    events: EventBus,
}

impl BackendHealthTracker {
    pub fn new(spec: BackendSpec, events: EventBus) -> Self {
        // Unknown counts as healthy until the first probe says otherwise.
        let initial = ProbeState {
            probe_ok: true,
            ..Default::default()
        };
        Self {
            breaker: CircuitBreaker::new(spec.circuit.clone()),
            spec,
            probe_state: ArcSwap::from_pointee(initial),
            last_request: AtomicU64::new(0),
            epoch: Instant::now(),
            reported_healthy: AtomicBool::new(true),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Whether the circuit lets a request through right now.
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now()).is_admitted()
    }

    /// Reserve an attempt against this backend. `None` when the circuit denies it.
    ///
    /// The lease reports its outcome through [`BackendLease::complete`]; dropping it
    /// without an outcome hands a half-open trial back to the breaker.
    pub fn acquire(self: &Arc<Self>) -> Option<BackendLease> {
        let now = Instant::now();
        match self.admit_at(now) {
            Admission::Denied => None,
            admission => {
                self.mark_request_at(now);
                Some(BackendLease {
                    tracker: self.clone(),
                    trial: admission == Admission::Trial,
                    completed: false,
                })
            }
        }
    }

    /// Report the outcome of a real request so production failures count toward the breaker.
    pub fn record_live_outcome(&self, success: bool) {
        self.record_request_outcome(success, false);
    }

    fn record_request_outcome(&self, success: bool, trial: bool) {
        let now = Instant::now();
        self.mark_request_at(now);
        if success {
            self.clear_stale_probe_failure();
        }
        let transition = self.breaker.record_at(success, trial, now);
        self.after_breaker_change(transition);
    }

    /// A request that just succeeded outranks an older failed probe. Recent traffic
    /// suppresses probing, so nothing else would clear it.
    fn clear_stale_probe_failure(&self) {
        let previous = self.probe_state.load();
        if previous.probe_ok {
            return;
        }
        self.probe_state.store(Arc::new(ProbeState {
            probe_ok: true,
            last_success: Some(Utc::now()),
            dns_resolved: true,
            last_error: None,
            ..ProbeState::clone(&previous)
        }));
    }

    /// One scheduler cycle: maybe probe, then feed the breaker.
    pub async fn tick(&self, probe: &HealthProbe) -> TickOutcome {
        if !self.spec.health.enabled {
            return TickOutcome::Disabled;
        }

        let now = Instant::now();
        if self.recently_used(now) && self.breaker.state() == CircuitState::Closed {
            tracing::trace!(backend = %self.spec.id, "Skipping health check, backend saw recent traffic");
            metrics::record_health_check(&self.spec.id, "skipped");
            return TickOutcome::SkippedRecentTraffic;
        }

        let admission = self.admit_at(now);
        if admission == Admission::Denied {
            tracing::trace!(backend = %self.spec.id, "Skipping health check, circuit open");
            return TickOutcome::SkippedCircuitOpen;
        }

        let result = probe.probe(&self.spec).await;
        let success = result.success;
        self.record_probe(result, admission);
        TickOutcome::Probed { success }
    }

    /// Publish a probe result and feed it to the breaker. `admission` is what the
    /// breaker granted before the probe; a `Trial` probe decides a half-open circuit.
    pub fn record_probe(&self, result: ProbeResult, admission: Admission) {
        let now = Utc::now();
        let previous = self.probe_state.load();

        let label = match &result.error {
            None => "success",
            Some(e) => e.label(),
        };
        metrics::record_health_check(&self.spec.id, label);

        if let Some(error) = &result.error {
            tracing::debug!(backend = %self.spec.id, error = %error, "Health check failed");
        }

        self.probe_state.store(Arc::new(ProbeState {
            probe_ok: result.success,
            last_check: Some(now),
            last_success: if result.success { Some(now) } else { previous.last_success },
            response_time: result.response_time,
            dns_resolved: result.dns_resolved,
            resolved_ips: result.resolved_ips,
            last_error: result.error.map(|e| e.to_string()),
        }));

        let trial = admission == Admission::Trial;
        let transition = self.breaker.record_at(result.success, trial, Instant::now());
        self.after_breaker_change(transition);
    }

    pub fn is_healthy(&self) -> bool {
        self.probe_state.load().probe_ok && self.breaker.state() != CircuitState::Open
    }

    pub fn snapshot(&self) -> BackendHealthReport {
        let probe = self.probe_state.load_full();
        let circuit = self.breaker.snapshot();
        BackendHealthReport {
            backend_id: self.spec.id.clone(),
            url: self.spec.url.to_string(),
            healthy: probe.probe_ok && circuit.state != CircuitState::Open,
            last_check: probe.last_check,
            last_success: probe.last_success,
            response_time: probe.response_time,
            dns_resolved: probe.dns_resolved,
            resolved_ips: probe.resolved_ips.clone(),
            circuit_breaker_open: circuit.state == CircuitState::Open,
            circuit_breaker_state: circuit.state,
            circuit_failure_count: circuit.failure_count,
        }
    }

    pub fn last_request_at(&self) -> Option<Instant> {
        match self.last_request.load(Ordering::Relaxed) {
            0 => None,
            stamp => Some(self.epoch + Duration::from_millis(stamp - 1)),
        }
    }

    fn recently_used(&self, now: Instant) -> bool {
        let threshold = self.spec.health.recent_request_threshold;
        !threshold.is_zero()
            && self
                .last_request_at()
                .is_some_and(|at| now.saturating_duration_since(at) < threshold)
    }

    fn mark_request_at(&self, now: Instant) {
        let millis = now.saturating_duration_since(self.epoch).as_millis();
        let stamp = u64::try_from(millis).unwrap_or(u64::MAX - 1) + 1;
        self.last_request.store(stamp, Ordering::Relaxed);
    }

    fn admit_at(&self, now: Instant) -> Admission {
        let (admission, transition) = self.breaker.try_admit_at(now);
        self.after_breaker_change(transition);
        admission
    }

    fn after_breaker_change(&self, transition: Option<Transition>) {
        if let Some(transition) = transition {
            let backend = self.spec.id.clone();
            let event = match transition {
                Transition::Opened { failures } => ProxyEvent::CircuitOpened { backend, failures },
                Transition::HalfOpened => ProxyEvent::CircuitHalfOpened { backend },
                Transition::Closed => ProxyEvent::CircuitClosed { backend },
            };
            metrics::record_circuit_state(&self.spec.id, self.breaker.state());
            self.events.publish(event);
        }
        self.publish_health_change();
    }

    fn publish_health_change(&self) {
        let healthy = self.is_healthy();
        if self.reported_healthy.swap(healthy, Ordering::AcqRel) == healthy {
            return;
        }
        let backend = self.spec.id.clone();
        let event = if healthy {
            ProxyEvent::BackendHealthy { backend }
        } else {
            let probe = self.probe_state.load();
            let reason = match &probe.last_error {
                Some(error) if !probe.probe_ok => Some(error.clone()),
                _ => Some("circuit open".to_string()),
            };
            ProxyEvent::BackendUnhealthy { backend, reason }
        };
        self.events.publish(event);
    }
}

/// An admitted attempt against a backend.
#[derive(Debug)]
pub struct BackendLease {
    tracker: Arc<BackendHealthTracker>,
    trial: bool,
    completed: bool,
}

impl BackendLease {
    pub fn tracker(&self) -> &Arc<BackendHealthTracker> {
        &self.tracker
    }

    /// True if this attempt is the circuit's half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn complete(mut self, success: bool) {
        self.completed = true;
        self.tracker.record_request_outcome(success, self.trial);
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        if !self.completed && self.trial {
            self.tracker.breaker.release_trial();
        }
    }
}
