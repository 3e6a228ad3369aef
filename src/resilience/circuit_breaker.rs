//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first admission attempt after open_timeout
//! Half-Open → Closed: trial succeeds (failure count reset)
//! Half-Open → Open: trial fails (open_timeout restarts)
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in Half-Open; only its outcome moves the circuit out of Half-Open
//! - Any success while Closed clears the failure counter
//! - All transitions happen under one mutex; no I/O is done while holding it

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::CircuitSettings;

/// Breaker state as reported to the health endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    /// Gauge encoding used by the metrics exporter.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of asking the breaker for permission to contact the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit open, or a half-open trial is already in flight.
    Denied,
    /// Circuit closed.
    Admitted,
    /// The single half-open trial. Its outcome decides the next state.
    Trial,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Denied)
    }
}

/// A state change caused by an admission or an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened { failures: u32 },
    HalfOpened,
    Closed,
}

/// Consistent point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<Instant>,
    pub trial_in_flight: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker guarding a single backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: CircuitSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                trial_started_at: None,
            }),
        }
    }

    pub fn settings(&self) -> &CircuitSettings {
        &self.settings
    }

    /// True if a request may be sent to the backend right now.
    pub fn admit(&self) -> bool {
        self.try_admit().0.is_admitted()
    }

    /// Ask for admission, reporting any state change it caused.
    pub fn try_admit(&self) -> (Admission, Option<Transition>) {
        self.try_admit_at(Instant::now())
    }

    pub fn try_admit_at(&self, now: Instant) -> (Admission, Option<Transition>) {
        if !self.settings.enabled {
            return (Admission::Admitted, None);
        }

        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => (Admission::Admitted, None),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |at| now.saturating_duration_since(at) >= self.settings.open_timeout);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started_at = Some(now);
                    (Admission::Trial, Some(Transition::HalfOpened))
                } else {
                    (Admission::Denied, None)
                }
            }
            CircuitState::HalfOpen => {
                // A trial whose outcome never arrived is presumed lost after one open_timeout.
                let free = inner
                    .trial_started_at
                    .map_or(true, |at| now.saturating_duration_since(at) >= self.trial_expiry());
                if free {
                    inner.trial_started_at = Some(now);
                    (Admission::Trial, None)
                } else {
                    (Admission::Denied, None)
                }
            }
        }
    }

    /// Current state without triggering the lazy Open → HalfOpen move.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            opened_at: inner.opened_at,
            trial_in_flight: inner.state == CircuitState::HalfOpen && inner.trial_started_at.is_some(),
        }
    }

    /// Outcome of a request admitted while the circuit was closed.
    ///
    /// Only the trial decides a half-open circuit, so ordinary outcomes arriving
    /// while half-open or open are ignored.
    pub fn record_success(&self) -> Option<Transition> {
        self.record_at(true, false, Instant::now())
    }

    pub fn record_failure(&self) -> Option<Transition> {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) -> Option<Transition> {
        self.record_at(false, false, now)
    }

    /// Outcome of the half-open trial.
    pub fn record_trial_success(&self) -> Option<Transition> {
        self.record_at(true, true, Instant::now())
    }

    pub fn record_trial_failure_at(&self, now: Instant) -> Option<Transition> {
        self.record_at(false, true, now)
    }

    /// Record an outcome; `trial` marks the attempt admitted as the half-open trial.
    pub fn record_at(&self, success: bool, trial: bool, now: Instant) -> Option<Transition> {
        if !self.settings.enabled {
            return None;
        }

        let mut inner = self.lock();
        match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.failure_count = 0;
                None
            }
            (CircuitState::Closed, false) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.settings.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    Some(Transition::Opened {
                        failures: inner.failure_count,
                    })
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, true) if trial => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                inner.trial_started_at = None;
                Some(Transition::Closed)
            }
            (CircuitState::HalfOpen, false) if trial => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_started_at = None;
                Some(Transition::Opened {
                    failures: inner.failure_count,
                })
            }
            // Late results of requests admitted before the circuit opened.
            (CircuitState::HalfOpen, _) | (CircuitState::Open, _) => None,
        }
    }

    /// Give back a half-open trial whose request was abandoned without an outcome.
    pub fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_started_at = None;
        }
    }

    fn trial_expiry(&self) -> Duration {
        self.settings.open_timeout.max(Duration::from_millis(1))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }
}
