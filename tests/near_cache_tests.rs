//! Integration tests for the local tier in front of the loader.

mod common;

use std::time::Duration;

use refresh_ahead::config::{NearConfig, RefreshConfig, StoreConfig};
use refresh_ahead::{FixedPolicy, NearCache};

use common::{secs, Harness, Mode, ScriptedSource};

fn near(h: &Harness) -> NearCache<String, String> {
    NearCache::new(h.loader.clone(), &NearConfig::default())
}

fn key(k: &str) -> String {
    k.to_string()
}

#[tokio::test]
async fn test_local_hit_skips_remote_store() {
    let h = Harness::new();
    let near = near(&h);

    let first = near.get(&key("a")).await.unwrap();
    let gets_after_miss = h.store.get_count();
    let second = near.get(&key("a")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.store.get_count(), gets_after_miss);
    assert_eq!(h.source.fetches(), 1);

    near.sync().await;
    assert_eq!(near.entry_count(), 1);
}

#[tokio::test]
async fn test_concurrent_misses_share_one_load() {
    let source = ScriptedSource::with_latency(Duration::from_millis(50));
    let h = Harness::with_source(
        source,
        FixedPolicy::new(secs(60), secs(30)),
        RefreshConfig::default(),
        StoreConfig::default(),
    );
    let near = near(&h);

    let (ka, kb, kc) = (key("a"), key("a"), key("a"));
    let (a, b, c) = tokio::join!(
        near.get(&ka),
        near.get(&kb),
        near.get(&kc)
    );

    assert_eq!(h.source.fetches(), 1);
    assert_eq!(a.as_ref().and_then(|e| e.value()).map(String::as_str), Some("a@v1"));
    assert_eq!(a, b);
    assert_eq!(b, c);
}

#[tokio::test]
async fn test_eligible_local_entry_refreshes_once() {
    let h = Harness::new();
    let near = near(&h);

    near.get(&key("a")).await.unwrap();
    h.clock.advance(secs(31));

    let stale = near.get(&key("a")).await.unwrap();
    let again = near.get(&key("a")).await.unwrap();
    assert_eq!(stale.value().map(String::as_str), Some("a@v1"));
    assert!(again.value().is_some());

    h.loader.pool().wait_idle().await;
    assert!(!near.is_refreshing(&key("a")));
    assert_eq!(h.source.fetches(), 2);
    assert_eq!(near.stats().refreshes_scheduled, 1);

    let refreshed = near.get(&key("a")).await.unwrap();
    assert_eq!(refreshed.value().map(String::as_str), Some("a@v2"));
    assert_eq!(h.stored("a").await, Some(refreshed));
}

#[tokio::test]
async fn test_expired_local_entry_is_reloaded() {
    let h = Harness::new();
    let near = near(&h);

    near.get(&key("a")).await.unwrap();
    h.clock.advance(secs(61));

    let reloaded = near.get(&key("a")).await.unwrap();

    assert_eq!(reloaded.value().map(String::as_str), Some("a@v2"));
    assert_eq!(h.source.fetches(), 2);
    assert_eq!(h.loader.pool().stats().total_submitted, 0);
}

#[tokio::test]
async fn test_missing_values_are_not_cached_locally() {
    let h = Harness::new();
    let near = near(&h);
    h.source.set_mode(Mode::Missing);

    assert!(near.get(&key("a")).await.is_none());
    assert!(near.get(&key("a")).await.is_none());
    assert_eq!(h.source.fetches(), 2);

    h.source.set_mode(Mode::Value);
    let entry = near.get(&key("a")).await.unwrap();
    assert_eq!(entry.value().map(String::as_str), Some("a@v3"));
}

#[tokio::test]
async fn test_invalidate_falls_through_to_remote() {
    let h = Harness::new();
    let near = near(&h);

    let first = near.get(&key("a")).await.unwrap();
    near.invalidate(&key("a")).await;
    let gets_before = h.store.get_count();
    let second = near.get(&key("a")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.store.get_count(), gets_before + 1);
    assert_eq!(h.source.fetches(), 1);
}

#[tokio::test]
async fn test_refresh_failure_keeps_local_entry() {
    let h = Harness::new();
    let near = near(&h);

    let original = near.get(&key("a")).await.unwrap();
    h.clock.advance(secs(40));
    h.source.set_mode(Mode::Error);

    assert_eq!(near.get(&key("a")).await, Some(original.clone()));
    h.loader.pool().wait_idle().await;

    assert_eq!(near.get(&key("a")).await, Some(original));
    h.loader.pool().wait_idle().await;
    assert_eq!(h.loader.stats().load_failures, 2);
}

#[tokio::test]
async fn test_local_hits_and_misses_are_counted() {
    let h = Harness::new();
    let near = near(&h);

    for _ in 0..5 {
        near.get(&key("a")).await.unwrap();
    }

    let local = near.stats();
    assert_eq!(local.hits, 4);
    assert_eq!(local.misses, 1);
    assert!((local.hit_rate() - 0.8).abs() < 1e-10);

    let remote = h.loader.stats();
    assert_eq!(remote.hits, 0);
    assert_eq!(remote.misses, 1);
}

#[tokio::test]
async fn test_size_evictions_are_counted() {
    let h = Harness::new();
    let near = NearCache::new(
        h.loader.clone(),
        &NearConfig {
            enabled: true,
            max_capacity: 2,
        },
    );

    for i in 0..20 {
        near.get(&format!("k{i}")).await.unwrap();
    }
    near.sync().await;

    assert!(near.entry_count() <= 2);
    assert!(near.stats().evictions >= 1);
}

#[tokio::test]
async fn test_explicit_invalidation_is_not_an_eviction() {
    let h = Harness::new();
    let near = near(&h);

    near.get(&key("a")).await.unwrap();
    near.invalidate(&key("a")).await;
    near.sync().await;

    assert_eq!(near.stats().evictions, 0);
}

#[tokio::test]
async fn test_refresh_adopts_entry_refreshed_by_peer() {
    let h = Harness::new();
    let first = near(&h);
    let second = NearCache::new(h.peer_loader(), &NearConfig::default());

    first.get(&key("a")).await.unwrap();
    second.get(&key("a")).await.unwrap();
    assert_eq!(h.source.fetches(), 1);

    h.clock.advance(secs(31));
    first.get(&key("a")).await.unwrap();
    first.loader().pool().wait_idle().await;
    assert_eq!(h.source.fetches(), 2);

    let stale = second.get(&key("a")).await.unwrap();
    assert_eq!(stale.value().map(String::as_str), Some("a@v1"));
    second.loader().pool().wait_idle().await;
    assert_eq!(h.source.fetches(), 2);

    let adopted = second.get(&key("a")).await.unwrap();
    assert_eq!(adopted.value().map(String::as_str), Some("a@v2"));
    assert_eq!(h.stored("a").await, Some(adopted));
}

#[tokio::test]
async fn test_invalidate_wins_over_refresh_in_flight() {
    let source = ScriptedSource::with_latency(Duration::from_millis(100));
    let h = Harness::with_source(
        source,
        FixedPolicy::new(secs(60), secs(30)),
        RefreshConfig::default(),
        StoreConfig::default(),
    );
    let near = near(&h);

    near.get(&key("a")).await.unwrap();
    h.clock.advance(secs(31));
    near.get(&key("a")).await.unwrap();
    assert!(near.is_refreshing(&key("a")));

    near.invalidate(&key("a")).await;
    assert!(!near.is_refreshing(&key("a")));
    h.loader.pool().wait_idle().await;
    near.sync().await;

    assert_eq!(near.entry_count(), 0);
    assert_eq!(h.source.fetches(), 2);
}

#[tokio::test]
async fn test_refresh_on_closed_pool_is_not_counted() {
    let h = Harness::new();
    let near = near(&h);

    near.get(&key("a")).await.unwrap();
    h.loader.shutdown().await;
    h.clock.advance(secs(31));

    assert!(near.get(&key("a")).await.is_some());
    assert!(!near.is_refreshing(&key("a")));
    assert_eq!(near.stats().refreshes_scheduled, 0);
}
