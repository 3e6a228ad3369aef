//! Response handling and transformation.
//!
//! # Responsibilities
//! - Transform backend response for client
//! - Map routing and upstream errors to HTTP status codes
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically
//! - Backend timeouts result in 504 Gateway Timeout
//! - No healthy backend is a 503, never the error of a single attempt

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use hyper::body::Incoming;
use serde_json::json;

use crate::flags::FlagError;
use crate::http::request::strip_hop_by_hop;
use crate::routing::RouteError;

impl RouteError {
    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::NoRoute { .. } | RouteError::RouteDisabled { .. } => StatusCode::NOT_FOUND,
            RouteError::NoHealthyBackend { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RouteError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            RouteError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RouteError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RouteError::Flag(FlagError::Cancelled { .. }) => StatusCode::GATEWAY_TIMEOUT,
            RouteError::Flag(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            RouteError::NoRoute { .. } => "no_route",
            RouteError::RouteDisabled { .. } => "route_disabled",
            RouteError::NoHealthyBackend { .. } => "no_healthy_backend",
            RouteError::Upstream { .. } => "upstream_error",
            RouteError::UpstreamTimeout { .. } => "upstream_timeout",
            RouteError::PayloadTooLarge { .. } => "payload_too_large",
            RouteError::Flag(_) => "flag_evaluation_failed",
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        // Upstream detail stays in the logs.
        let message = match &self {
            RouteError::Upstream { .. } => "upstream request failed".to_string(),
            RouteError::UpstreamTimeout { .. } => "upstream request timed out".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": self.code(), "message": message }))).into_response()
    }
}

/// Convert a backend response into the client response.
pub fn from_upstream(response: Response<Incoming>) -> axum::response::Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
