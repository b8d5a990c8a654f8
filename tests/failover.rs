//! Health-driven failover, reclaim, fast probes and capacity replacement.

use std::time::Duration;

use affinity_proxy::config::ProxyConfig;
use affinity_proxy::health::HealthState;
use affinity_proxy::reconciler::CapacityState;

mod common;

use common::{base_config, client, spawn_backend, start_proxy, wait_until, TestProxy, SESSION_HEADER};

fn with_probes(mut config: ProxyConfig, interval_ms: u64, failures: u32, successes: u32) -> ProxyConfig {
    config.health_check.enabled = true;
    config.health_check.interval_ms = interval_ms;
    config.health_check.timeout_ms = 100.min(interval_ms);
    config.health_check.failure_threshold = failures;
    config.health_check.success_threshold = successes;
    config
}

fn health(proxy: &TestProxy, id: &str) -> Option<HealthState> {
    proxy.registry.get(&id.into()).map(|b| b.health())
}

async fn served_by(proxy: &TestProxy, session: &str) -> String {
    client()
        .get(proxy.url("/"))
        .header(SESSION_HEADER, session)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap()
}

#[tokio::test]
async fn failover_and_reclaim_with_hysteresis() {
    let a = spawn_backend("a").await;
    let b = spawn_backend("b").await;
    let c = spawn_backend("c").await;
    let config = with_probes(base_config(&[("a", a.addr), ("b", b.addr), ("c", c.addr)]), 100, 3, 2);
    let proxy = start_proxy(config).await;

    let proxy = &proxy;
    let on_a = proxy.session_for(&["a", "b"]);
    let on_c = proxy.session_for(&["c"]);
    assert_eq!(served_by(proxy, &on_a).await, "a");
    assert_eq!(served_by(proxy, &on_c).await, "c");

    a.set_healthy(false);
    assert!(wait_until(Duration::from_secs(3), || async move { health(proxy, "a") == Some(HealthState::Unhealthy) }).await);
    assert_eq!(proxy.registry.healthy_count(), 2);

    assert_eq!(served_by(proxy, &on_a).await, "b");
    assert_eq!(served_by(proxy, &on_c).await, "c");

    a.set_healthy(true);
    assert!(wait_until(Duration::from_secs(3), || async move { health(proxy, "a") == Some(HealthState::Healthy) }).await);

    assert_eq!(served_by(proxy, &on_a).await, "a");
    assert_eq!(served_by(proxy, &on_c).await, "c");

    let snapshot = proxy.registry.get(&"a".into()).unwrap().snapshot();
    assert!(snapshot.last_checked_at.is_some());
}

#[tokio::test]
async fn forwarding_failure_triggers_fast_probe() {
    let mut a = spawn_backend("a").await;
    let b = spawn_backend("b").await;
    // The regular interval is far longer than the test.
    let config = with_probes(base_config(&[("a", a.addr), ("b", b.addr)]), 60_000, 1, 1);
    let proxy = &start_proxy(config).await;

    assert!(
        wait_until(Duration::from_secs(2), || async move {
            proxy
                .registry
                .get(&"a".into())
                .is_some_and(|b| b.snapshot().last_checked_at.is_some())
        })
        .await
    );
    assert_eq!(health(proxy, "a"), Some(HealthState::Healthy));

    let session = proxy.session_for(&["a", "b"]);
    a.stop().await;

    assert_eq!(served_by(proxy, &session).await, "b");
    assert!(wait_until(Duration::from_secs(2), || async move { health(proxy, "a") == Some(HealthState::Unhealthy) }).await);
    assert_eq!(served_by(proxy, &session).await, "b");
}

#[tokio::test]
async fn lost_capacity_is_replaced_and_reclaimed() {
    let mut a = spawn_backend("a").await;
    let mut config = with_probes(base_config(&[("a", a.addr)]), 100, 1, 1);
    config.capacity.enabled = true;
    config.capacity.min_healthy = 1;
    config.capacity.desired_capacity = 1;
    config.capacity.grace_period_ms = 500;
    config.capacity.reconcile_interval_ms = 50;
    let proxy = &start_proxy(config).await;
    let status = &proxy.reconciler.clone().unwrap();

    a.stop().await;
    assert!(wait_until(Duration::from_secs(3), || async move { status.borrow().state == CapacityState::Replacing }).await);
    assert!(!proxy.provisioner.requests().is_empty());

    // Nothing new joined, so the request is issued again after the grace period.
    assert!(wait_until(Duration::from_secs(3), || async move { proxy.provisioner.requests().len() >= 2 }).await);
    assert_eq!(status.borrow().state, CapacityState::Replacing);

    // The provisioned instance registers itself and must pass checks first.
    let replacement = spawn_backend("a2").await;
    proxy
        .registry
        .register("a2".into(), replacement.addr, HealthState::Unhealthy);
    assert!(wait_until(Duration::from_secs(3), || async move { status.borrow().state == CapacityState::AtCapacity }).await);
    assert_eq!(health(proxy, "a2"), Some(HealthState::Healthy));

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "a2");
}
