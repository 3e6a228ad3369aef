//! End-to-end routing through the proxy: flag-gated groups, failover, open circuits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

mod common;

#[tokio::test]
async fn test_tenant_flag_selects_alternative_group() {
    let new = common::start_static_backend("new").await;
    let legacy = common::start_static_backend("legacy").await;

    let mut config = common::base_config();
    config.backends.push(common::backend("new", new));
    config.backends.push(common::backend("legacy", legacy));
    let mut route = common::route("app", &["new"]);
    route.feature_flag = Some("new-ui".into());
    route.alternative_backends = vec!["legacy".into()];
    config.routes.push(route);
    config.feature_flags.flags.insert("new-ui".into(), true);
    config
        .feature_flags
        .tenants
        .insert("acme".into(), HashMap::from([("new-ui".to_string(), false)]));

    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let body = client.get(proxy.url("/page")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "new");

    let res = client
        .get(proxy.url("/page"))
        .header("x-tenant-id", "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "legacy");

    proxy.stop().await;
}

#[tokio::test]
async fn test_header_override_beats_config() {
    let new = common::start_static_backend("new").await;
    let legacy = common::start_static_backend("legacy").await;

    let mut config = common::base_config();
    config.backends.push(common::backend("new", new));
    config.backends.push(common::backend("legacy", legacy));
    let mut route = common::route("app", &["new"]);
    route.feature_flag = Some("new-ui".into());
    route.alternative_backends = vec!["legacy".into()];
    config.routes.push(route);
    config.feature_flags.flags.insert("new-ui".into(), true);
    config.feature_flags.header_overrides.enabled = true;

    let proxy = common::start_proxy(config).await;
    let res = common::client()
        .get(proxy.url("/"))
        .header("x-feature-flags", "new-ui=off")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "legacy");

    proxy.stop().await;
}

#[tokio::test]
async fn test_disabled_route_without_alternative_is_not_found() {
    let new = common::start_static_backend("new").await;

    let mut config = common::base_config();
    config.backends.push(common::backend("new", new));
    let mut route = common::route("beta", &["new"]);
    route.feature_flag = Some("beta".into());
    route.flag_default = false;
    config.routes.push(route);

    let proxy = common::start_proxy(config).await;
    let res = common::get(&proxy.url("/")).await;
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "route_disabled");

    proxy.stop().await;
}

#[tokio::test]
async fn test_failover_to_next_backend() {
    let dead = common::dead_address().await;
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let live = common::start_backend(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        (200, "live".into())
    })
    .await;

    let mut config = common::base_config();
    config.backends.push(common::backend("dead", dead));
    config.backends.push(common::backend("live", live));
    config.routes.push(common::route("app", &["dead", "live"]));

    let proxy = common::start_proxy(config).await;
    let client = common::client();
    for _ in 0..4 {
        let res = client.get(proxy.url("/")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "live");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    proxy.stop().await;
}

#[tokio::test]
async fn test_all_circuits_open_yields_service_unavailable() {
    let mut config = common::base_config();
    config.backends.push(common::backend("a", common::dead_address().await));
    config.backends.push(common::backend("b", common::dead_address().await));
    config.routes.push(common::route("app", &["a", "b"]));
    config.circuit_breaker_config.failure_threshold = 1;
    config.circuit_breaker_config.open_timeout_ms = 60_000;

    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let first = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(first.status(), 503);

    let second = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(second.status(), 503);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error"], "no_healthy_backend");

    let health = client.get(proxy.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 503);
    let summary: Value = health.json().await.unwrap();
    assert_eq!(summary["circuit_open_count"], 2);
    assert_eq!(summary["healthy_backends"], 0);

    proxy.stop().await;
}

#[tokio::test]
async fn test_server_error_is_relayed_when_no_backend_succeeds() {
    let failing = common::start_backend(|_| (500, "boom".into())).await;

    let mut config = common::base_config();
    config.backends.push(common::backend("only", failing));
    config.routes.push(common::route("app", &["only"]));

    let proxy = common::start_proxy(config).await;
    let res = common::get(&proxy.url("/")).await;
    assert_eq!(res.status(), 500);
    assert_eq!(res.text().await.unwrap(), "boom");

    proxy.stop().await;
}

#[tokio::test]
async fn test_unmatched_path_is_not_found() {
    let live = common::start_static_backend("api").await;

    let mut config = common::base_config();
    config.backends.push(common::backend("api", live));
    let mut route = common::route("api", &["api"]);
    route.path_prefix = "/api".into();
    config.routes.push(route);

    let proxy = common::start_proxy(config).await;
    let res = common::get(&proxy.url("/other")).await;
    assert_eq!(res.status(), 404);
    let ok = common::get(&proxy.url("/api/users")).await;
    assert_eq!(ok.status(), 200);

    proxy.stop().await;
}

#[tokio::test]
async fn test_reload_swaps_routes() {
    let one = common::start_static_backend("one").await;
    let two = common::start_static_backend("two").await;

    let mut config = common::base_config();
    config.backends.push(common::backend("one", one));
    config.routes.push(common::route("app", &["one"]));
    let proxy = common::start_proxy(config).await;

    let body = common::get(&proxy.url("/")).await.text().await.unwrap();
    assert_eq!(body, "one");

    let mut next = common::base_config();
    next.backends.push(common::backend("two", two));
    next.routes.push(common::route("app", &["two"]));
    proxy.reloads.send(next).unwrap();

    let url = proxy.url("/");
    let swapped = common::eventually(Duration::from_secs(3), || {
        let url = url.clone();
        async move {
            match common::client().get(&url).send().await {
                Ok(res) => res.text().await.map(|b| b == "two").unwrap_or(false),
                Err(_) => false,
            }
        }
    })
    .await;
    assert!(swapped);

    proxy.stop().await;
}
