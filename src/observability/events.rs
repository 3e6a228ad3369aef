//! Proxy lifecycle events.
//!
//! # Data Flow
//! ```text
//! tracker / aggregator / router
//!     → EventBus::publish (try_send, never blocks)
//!     → bounded mpsc queue
//!     → EventDispatcher task (single consumer, in publish order)
//!     → EventObserver sinks (logging + metrics built in)
//! ```
//!
//! A full queue drops the event and counts it; publishers are on the request
//! path and must not wait for observers.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::observability::metrics;

/// Something observers may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    BackendHealthy { backend: String },
    BackendUnhealthy { backend: String, reason: Option<String> },
    CircuitOpened { backend: String, failures: u32 },
    CircuitHalfOpened { backend: String },
    CircuitClosed { backend: String },
    FlagEvaluatorFatal { flag: String, evaluator: String },
    NoHealthyBackend { route: String },
    ConfigReloaded { backends: usize },
}

impl ProxyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyEvent::BackendHealthy { .. } => "backend.healthy",
            ProxyEvent::BackendUnhealthy { .. } => "backend.unhealthy",
            ProxyEvent::CircuitOpened { .. } => "circuit.opened",
            ProxyEvent::CircuitHalfOpened { .. } => "circuit.half_opened",
            ProxyEvent::CircuitClosed { .. } => "circuit.closed",
            ProxyEvent::FlagEvaluatorFatal { .. } => "flag.evaluator_fatal",
            ProxyEvent::NoHealthyBackend { .. } => "routing.no_healthy_backend",
            ProxyEvent::ConfigReloaded { .. } => "config.reloaded",
        }
    }
}

/// A sink attached to the dispatcher at wiring time.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &ProxyEvent);
}

/// Cloneable publishing handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::Sender<ProxyEvent>,
}

impl EventBus {
    /// Create a bus with a queue of `capacity` events and the receiving end for the dispatcher.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProxyEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// A bus nobody listens to. Publishing is a no-op.
    pub fn detached() -> Self {
        Self::channel(1).0
    }

    pub fn publish(&self, event: ProxyEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::record_event_dropped(event.kind());
                tracing::warn!(kind = event.kind(), "Event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Single consumer delivering events to every observer in publish order.
pub struct EventDispatcher {
    rx: mpsc::Receiver<ProxyEvent>,
    observers: Vec<Arc<dyn EventObserver>>,
}

impl EventDispatcher {
    /// Dispatcher with the built-in logging observer.
    pub fn new(rx: mpsc::Receiver<ProxyEvent>) -> Self {
        Self {
            rx,
            observers: vec![Arc::new(LogObserver)],
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Deliver events until every publisher is gone or shutdown is signalled.
    /// On shutdown, events already queued are still delivered.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                biased;
                event = self.rx.recv() => match event {
                    Some(event) => self.dispatch(&event),
                    None => break,
                },
                _ = shutdown.recv() => {
                    self.rx.close();
                    while let Some(event) = self.rx.recv().await {
                        self.dispatch(&event);
                    }
                    break;
                }
            }
        }
        tracing::debug!("Event dispatcher stopped");
    }

    fn dispatch(&self, event: &ProxyEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// Writes every event to the log and mirrors health changes into gauges.
struct LogObserver;

impl EventObserver for LogObserver {
    fn on_event(&self, event: &ProxyEvent) {
        match event {
            ProxyEvent::BackendHealthy { backend } => {
                metrics::record_backend_health(backend, true);
                tracing::info!(backend = %backend, "Backend became healthy");
            }
            ProxyEvent::BackendUnhealthy { backend, reason } => {
                metrics::record_backend_health(backend, false);
                tracing::warn!(backend = %backend, reason = ?reason, "Backend became unhealthy");
            }
            ProxyEvent::CircuitOpened { backend, failures } => {
                tracing::warn!(backend = %backend, failures, "Circuit opened");
            }
            ProxyEvent::CircuitHalfOpened { backend } => {
                tracing::info!(backend = %backend, "Circuit half-open, trial admitted");
            }
            ProxyEvent::CircuitClosed { backend } => {
                tracing::info!(backend = %backend, "Circuit closed");
            }
            ProxyEvent::FlagEvaluatorFatal { flag, evaluator } => {
                tracing::error!(flag = %flag, evaluator = %evaluator, "Flag evaluation halted by fatal evaluator");
            }
            ProxyEvent::NoHealthyBackend { route } => {
                tracing::warn!(route = %route, "No healthy backend available");
            }
            ProxyEvent::ConfigReloaded { backends } => {
                tracing::info!(backends, "Configuration reloaded");
            }
        }
    }
}
