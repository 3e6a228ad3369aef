//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health endpoints and the proxy fallback
//! - Wire up middleware (tracing, timeout, request ID)
//! - Dispatch requests to the routing decision point
//! - Forward requests to upstream backends
//! - Swap runtime generations on config reload and restart probing
//!
//! # Endpoints
//! - `GET /health`: summary, 200 when every backend is healthy, else 503
//! - `GET /metrics/reverseproxy/health`: summary plus per-backend details, same status rule
//! - anything else: proxied

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{ConfigError, ProxyConfig};
use crate::flags::EvaluatorRegistry;
use crate::health::{BackendHealthTracker, HealthAggregator, HealthProbe, ProbeTasks};
use crate::http::request::{self, OutboundRequest};
use crate::http::response::from_upstream;
use crate::lifecycle::{ProxyRuntime, Shutdown};
use crate::observability::{metrics, EventBus, EventDispatcher, EventObserver, ProxyEvent};
use crate::resilience::retries;
use crate::routing::{Attempt, RouteError};

pub type UpstreamClient = Client<HttpConnector, Body>;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ArcSwap<ProxyRuntime>>,
    pub client: UpstreamClient,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    state: AppState,
    registry: Arc<EvaluatorRegistry>,
    events: EventBus,
    dispatcher: EventDispatcher,
    probe: HealthProbe,
    request_timeout: Duration,
}

impl HttpServer {
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        Self::with_registry(config, Arc::new(EvaluatorRegistry::new()))
    }

    /// Build on a registry that may already hold evaluators registered by the embedder.
    pub fn with_registry(config: ProxyConfig, registry: Arc<EvaluatorRegistry>) -> Result<Self, ConfigError> {
        let (events, event_rx) = EventBus::channel(config.observability.event_buffer);
        let request_timeout = Duration::from_secs(config.timeouts.request_secs);
        let runtime = ProxyRuntime::build(config, &registry, &events)?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            state: AppState {
                runtime: Arc::new(ArcSwap::from_pointee(runtime)),
                client,
            },
            registry,
            events,
            dispatcher: EventDispatcher::new(event_rx),
            probe: HealthProbe::new(),
            request_timeout,
        })
    }

    pub fn registry(&self) -> &Arc<EvaluatorRegistry> {
        &self.registry
    }

    pub fn runtime(&self) -> Arc<ProxyRuntime> {
        self.state.runtime.load_full()
    }

    /// Attach an extra event sink.
    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.dispatcher = self.dispatcher.with_observer(observer);
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics/reverseproxy/health", get(detailed_health_handler))
            .fallback(proxy_handler)
            .with_state(self.state.clone())
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until `shutdown` fires, applying configs from `reloads` as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        reloads: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let mut server_shutdown = shutdown.subscribe();

        let dispatcher = tokio::spawn(self.dispatcher.run(shutdown.subscribe()));
        let reloader = tokio::spawn(reload_loop(
            self.state.runtime.clone(),
            self.registry.clone(),
            self.events.clone(),
            self.probe.clone(),
            reloads,
            shutdown.subscribe(),
        ));

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await;

        // The server may also stop on its own (listener error); take the rest down with it.
        shutdown.trigger();
        if let Err(e) = reloader.await {
            tracing::error!(error = %e, "Reload task failed");
        }
        if let Err(e) = dispatcher.await {
            tracing::error!(error = %e, "Event dispatcher failed");
        }

        tracing::info!("HTTP server stopped");
        served
    }
}

/// Owns the probe tasks of the current generation; replaces both on reload.
async fn reload_loop(
    runtime: Arc<ArcSwap<ProxyRuntime>>,
    registry: Arc<EvaluatorRegistry>,
    events: EventBus,
    probe: HealthProbe,
    mut reloads: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut probes = ProbeTasks::spawn(runtime.load().pool.all(), probe.clone());

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            Some(config) = reloads.recv() => {
                let bind_address = config.listener.bind_address.clone();
                match ProxyRuntime::build(config, &registry, &events) {
                    Ok(next) => {
                        if bind_address != runtime.load().config.listener.bind_address {
                            tracing::warn!(bind_address = %bind_address, "Listener address changes need a restart");
                        }
                        let next = Arc::new(next);
                        let fresh = ProbeTasks::spawn(next.pool.all(), probe.clone());
                        let previous = std::mem::replace(&mut probes, fresh);
                        runtime.store(next.clone());
                        previous.stop().await;
                        events.publish(ProxyEvent::ConfigReloaded { backends: next.pool.len() });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected configuration, keeping current runtime");
                    }
                }
            }
        }
    }

    probes.stop().await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state.runtime.load();
    let summary = HealthAggregator::summary(runtime.pool.all());
    (health_status(summary.healthy), Json(summary))
}

async fn detailed_health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state.runtime.load();
    let detailed = HealthAggregator::aggregate(runtime.pool.all());
    (health_status(detailed.summary.healthy), Json(detailed))
}

fn health_status(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Main proxy handler.
/// Plans the route, then tries admitted backends in order.
async fn proxy_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let runtime = state.runtime.load_full();
    let config = &runtime.config;

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let (parts, body) = request.into_parts();
    let request_id = request::request_id(&parts.headers).to_string();
    let method = parts.method.to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        "Proxying request"
    );

    let ctx = request::flag_context(&parts, Duration::from_secs(config.timeouts.request_secs));
    let plan = match runtime.router.plan(request::host(&parts), &ctx) {
        Ok(plan) => plan,
        Err(e) => return reject(e, &request_id, &method, start),
    };

    let limit = config.listener.max_body_bytes;
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(_) => return reject(RouteError::PayloadTooLarge { limit }, &request_id, &method, start),
    };

    let max_attempts = retries::max_attempts(&parts.method, plan.candidates.len());
    let outbound = OutboundRequest::new(parts, body, client_ip);
    let upstream_timeout = Duration::from_secs(config.timeouts.upstream_secs);

    let outbound = &outbound;
    let client = &state.client;
    let id = request_id.as_str();
    let result = runtime
        .router
        .execute(&plan, max_attempts, move |tracker| async move {
            forward(client, tracker, outbound, upstream_timeout, id).await
        })
        .await;

    match result {
        Ok((backend, response)) => {
            metrics::record_request(&method, response.status().as_u16(), &backend, start);
            from_upstream(response)
        }
        Err(e) => reject(e, &request_id, &method, start),
    }
}

fn reject(error: RouteError, request_id: &str, method: &str, start: Instant) -> Response {
    tracing::warn!(request_id = %request_id, error = %error, "Request rejected");
    metrics::record_request(method, error.status().as_u16(), "none", start);
    error.into_response()
}

/// One attempt against one backend.
async fn forward(
    client: &UpstreamClient,
    tracker: Arc<BackendHealthTracker>,
    outbound: &OutboundRequest,
    timeout: Duration,
    request_id: &str,
) -> Attempt<(String, Response<Incoming>)> {
    let backend = tracker.id().to_string();
    let request = match outbound.to_backend(&tracker.spec().url) {
        Ok(request) => request,
        Err(e) => {
            return Attempt::Failure(RouteError::Upstream {
                backend,
                reason: e.to_string(),
            })
        }
    };

    match time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            let status = response.status();
            if retries::is_failure_status(status) {
                tracing::debug!(request_id = %request_id, backend = %backend, status = %status, "Upstream server error");
                Attempt::Degraded((backend, response))
            } else {
                Attempt::Success((backend, response))
            }
        }
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, backend = %backend, error = %e, "Upstream error");
            Attempt::Failure(RouteError::Upstream {
                backend,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            tracing::error!(request_id = %request_id, backend = %backend, "Upstream timeout");
            Attempt::Failure(RouteError::UpstreamTimeout { backend, timeout })
        }
    }
}
