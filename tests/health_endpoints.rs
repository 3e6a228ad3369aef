//! Health endpoints driven by real probes against a flapping backend.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

mod common;

async fn details(url: &str) -> (u16, Value) {
    let res = common::get(url).await;
    let status = res.status().as_u16();
    (status, res.json().await.unwrap())
}

#[tokio::test]
async fn test_intermittent_backend_opens_and_recovers() {
    let health_status = Arc::new(AtomicU16::new(200));
    let status = health_status.clone();
    let api = common::start_backend(move |path| {
        if path == "/health" {
            (status.load(Ordering::SeqCst), "ok".into())
        } else {
            (200, "api".into())
        }
    })
    .await;

    let mut config = common::base_config();
    config.backends.push(common::backend("intermittent-api", api));
    config.routes.push(common::route("app", &["intermittent-api"]));
    config.health_check.enabled = true;
    config.health_check.interval_ms = 50;
    config.health_check.timeout_ms = 500;
    config
        .health_check
        .health_endpoints
        .insert("intermittent-api".into(), "/health".into());
    config.circuit_breaker_config.failure_threshold = 2;
    config.circuit_breaker_config.open_timeout_ms = 200;

    let proxy = common::start_proxy(config).await;
    let detail_url = proxy.url("/metrics/reverseproxy/health");

    let probed = common::eventually(Duration::from_secs(3), || {
        let url = detail_url.clone();
        async move {
            let (status, body) = details(&url).await;
            status == 200 && !body["backend_details"]["intermittent-api"]["last_success"].is_null()
        }
    })
    .await;
    assert!(probed, "backend never passed a probe");

    health_status.store(500, Ordering::SeqCst);
    let opened = common::eventually(Duration::from_secs(3), || {
        let url = detail_url.clone();
        async move {
            let (status, body) = details(&url).await;
            status == 503 && body["backend_details"]["intermittent-api"]["circuit_breaker_state"] == "open"
        }
    })
    .await;
    assert!(opened, "circuit never opened");

    let (_, body) = details(&detail_url).await;
    assert_eq!(body["circuit_open_count"], 1);
    assert_eq!(body["unhealthy_backends"], 1);
    assert_eq!(body["backend_details"]["intermittent-api"]["circuit_breaker_open"], true);

    health_status.store(200, Ordering::SeqCst);
    let recovered = common::eventually(Duration::from_secs(3), || {
        let url = detail_url.clone();
        async move {
            let (status, body) = details(&url).await;
            status == 200 && body["backend_details"]["intermittent-api"]["circuit_breaker_state"] == "closed"
        }
    })
    .await;
    assert!(recovered, "circuit never closed again");

    let summary = common::get(&proxy.url("/health")).await;
    assert_eq!(summary.status(), 200);
    let summary: Value = summary.json().await.unwrap();
    assert_eq!(summary["healthy"], true);
    assert_eq!(summary["circuit_open_count"], 0);
    assert!(summary.get("backend_details").is_none());

    proxy.stop().await;
}

#[tokio::test]
async fn test_detailed_report_shape() {
    let api = common::start_static_backend("ok").await;

    let mut config = common::base_config();
    config.backends.push(common::backend("api", api));
    config.health_check.enabled = true;
    config.health_check.interval_ms = 50;

    let proxy = common::start_proxy(config).await;
    let detail_url = proxy.url("/metrics/reverseproxy/health");

    let resolved = common::eventually(Duration::from_secs(3), || {
        let url = detail_url.clone();
        async move {
            let (_, body) = details(&url).await;
            body["backend_details"]["api"]["dns_resolved"] == true
        }
    })
    .await;
    assert!(resolved);

    let (status, body) = details(&detail_url).await;
    assert_eq!(status, 200);
    assert_eq!(body["total_backends"], 1);
    let api = &body["backend_details"]["api"];
    assert_eq!(api["backend_id"], "api");
    assert_eq!(api["resolved_ips"][0], "127.0.0.1");
    assert!(api["response_time"].is_u64());
    assert!(api["last_check"].is_string());

    proxy.stop().await;
}

#[tokio::test]
async fn test_no_backends_is_healthy() {
    let proxy = common::start_proxy(common::base_config()).await;

    let res = common::get(&proxy.url("/health")).await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total_backends"], 0);
    assert_eq!(body["healthy"], true);

    proxy.stop().await;
}
