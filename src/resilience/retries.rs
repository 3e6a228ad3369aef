//! Failover policy.
//!
//! # Responsibilities
//! - Determine if a request may be replayed against another backend
//! - Classify upstream outcomes as breaker failures or successes
//!
//! # Design Decisions
//! - Never replay POST/PATCH (non-idempotent); they get exactly one attempt
//! - Connection errors, timeouts and 5xx count as failures
//! - 4xx are NOT failures (client error, not backend)

use axum::http::{Method, StatusCode};

pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE | Method::PUT | Method::DELETE
    )
}

/// Attempts allowed for a request with `candidates` admitted backends.
pub fn max_attempts(method: &Method, candidates: usize) -> usize {
    if is_idempotent(method) {
        candidates.max(1)
    } else {
        1
    }
}

/// Whether an upstream response counts against the backend.
pub fn is_failure_status(status: StatusCode) -> bool {
    status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::PUT));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(max_attempts(&Method::GET, 3), 3);
        assert_eq!(max_attempts(&Method::GET, 0), 1);
        assert_eq!(max_attempts(&Method::POST, 3), 1);
    }

    #[test]
    fn test_failure_classification() {
        assert!(is_failure_status(StatusCode::BAD_GATEWAY));
        assert!(is_failure_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_failure_status(StatusCode::NOT_FOUND));
        assert!(!is_failure_status(StatusCode::OK));
    }
}
