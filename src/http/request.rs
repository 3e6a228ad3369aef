//! Request handling and transformation.
//!
//! # Responsibilities
//! - Read the request ID assigned by the request-id layer
//! - Build the flag evaluation context for a request
//! - Prepare the outbound copy forwarded to a backend
//!
//! # Design Decisions
//! - Original request preserved for logging; modified copy forwarded
//! - Hop-by-hop headers never cross the proxy
//! - Body is buffered once so failover can replay it

use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::uri::{Authority, Scheme};
use axum::http::{Request, Uri};
use url::Url;

use crate::flags::RequestContext;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Host the client addressed, from the Host header or an absolute URI.
pub fn host(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())
}

/// Flag context for a request that must be decided before `timeout` elapses.
pub fn flag_context(parts: &Parts, timeout: Duration) -> RequestContext {
    RequestContext::new(parts.method.clone(), parts.uri.path(), parts.headers.clone())
        .with_deadline(Instant::now() + timeout)
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Everything needed to replay a request against any backend.
#[derive(Debug)]
pub struct OutboundRequest {
    parts: Parts,
    body: Bytes,
    client_ip: Option<String>,
}

impl OutboundRequest {
    pub fn new(parts: Parts, body: Bytes, client_ip: Option<String>) -> Self {
        Self { parts, body, client_ip }
    }

    pub fn method(&self) -> &axum::http::Method {
        &self.parts.method
    }

    /// The request rewritten for `backend`: scheme and authority replaced, path and
    /// query kept, the backend URL's base path prepended.
    pub fn to_backend(&self, backend: &Url) -> Result<Request<Body>, axum::http::Error> {
        let uri = rewrite_uri(&self.parts.uri, backend)?;

        let mut headers = self.parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        if let Some(ip) = &self.client_ip {
            let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip.clone(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        let mut builder = Request::builder().method(self.parts.method.clone()).uri(uri);
        if let Some(h) = builder.headers_mut() {
            *h = headers;
        }
        builder.body(Body::from(self.body.clone()))
    }
}

fn rewrite_uri(original: &Uri, backend: &Url) -> Result<Uri, axum::http::Error> {
    let base = backend.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let authority = match backend.port() {
        Some(port) => format!("{}:{port}", backend.host_str().unwrap_or_default()),
        None => backend.host_str().unwrap_or_default().to_string(),
    };

    Ok(Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(Authority::try_from(authority.as_str())?)
        .path_and_query(format!("{base}{path_and_query}"))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(uri: &str) -> Parts {
        let (parts, _) = Request::builder()
            .method("POST")
            .uri(uri)
            .header("host", "proxy.example.com")
            .header("connection", "keep-alive, x-custom-hop")
            .header("x-custom-hop", "1")
            .header("x-tenant-id", "acme")
            .header(X_FORWARDED_FOR, "10.0.0.1")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_rewrite_for_backend() {
        let outbound = OutboundRequest::new(parts("/api/items?page=2"), Bytes::from_static(b"{}"), Some("192.168.1.9".into()));
        let backend = Url::parse("http://10.1.2.3:8080/v2/").unwrap();
        let request = outbound.to_backend(&backend).unwrap();

        assert_eq!(request.uri().to_string(), "http://10.1.2.3:8080/v2/api/items?page=2");
        assert_eq!(*request.method(), axum::http::Method::POST);
        let headers = request.headers();
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-custom-hop").is_none());
        assert!(headers.get(header::HOST).is_none());
        assert_eq!(headers["x-tenant-id"], "acme");
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.1, 192.168.1.9");
    }

    #[test]
    fn test_root_backend_keeps_path() {
        let outbound = OutboundRequest::new(parts("/"), Bytes::new(), None);
        let request = outbound.to_backend(&Url::parse("http://backend").unwrap()).unwrap();
        assert_eq!(request.uri().to_string(), "http://backend/");
    }

    #[test]
    fn test_request_id_and_host() {
        let p = parts("/x");
        assert_eq!(request_id(&p.headers), "unknown");
        assert_eq!(host(&p), Some("proxy.example.com"));
    }
}
