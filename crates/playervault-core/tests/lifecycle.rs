//! End-to-end session tests for the coherence core.
//!
//! These drive the full wiring -- host handle, coordinator event loop,
//! cache, placeholder registry -- over the in-memory store double, so
//! they run without a database. The data layer's own CAS semantics are
//! covered by the `playervault-db` live-database tests.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use playervault_core::cache::PlayerCache;
use playervault_core::config::CacheConfig;
use playervault_core::lifecycle::{HostHandle, LifecycleCoordinator};
use playervault_core::placeholders::PlaceholderRegistry;
use playervault_core::testing::MemoryStore;
use playervault_types::{AttributeValue, PlayerId};

fn test_config() -> CacheConfig {
    CacheConfig {
        flush_interval_secs: 3600,
        leave_grace_ms: 300,
        retry_attempts: 3,
        retry_backoff_ms: 1,
        event_queue_capacity: 32,
    }
}

fn spawn_core(
    store: Arc<MemoryStore>,
    defaults: BTreeMap<String, AttributeValue>,
) -> (Arc<PlayerCache>, LifecycleCoordinator, HostHandle) {
    let cache = Arc::new(PlayerCache::new(store, test_config(), defaults));
    let (coordinator, handle) = LifecycleCoordinator::spawn(Arc::clone(&cache), &test_config());
    (cache, coordinator, handle)
}

/// Poll until the condition holds, failing after a generous deadline.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0_u32..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn full_session_round_trip_persists_final_state() {
    let store = Arc::new(MemoryStore::new());
    let mut defaults = BTreeMap::new();
    defaults.insert(String::from("score"), AttributeValue::Int(0));
    let (cache, coordinator, handle) = spawn_core(Arc::clone(&store), defaults);
    let id = PlayerId::new();

    assert!(handle.player_join(id, "Alice"));
    wait_until("join to activate", || cache.get(id).is_some()).await;

    for points in [10_i64, 25, 40] {
        cache
            .mutate(id, |r| {
                r.set_attribute("score", points);
            })
            .expect("mutate must succeed");
    }

    assert!(handle.player_leave(id));
    wait_until("leave to evict", || cache.is_empty()).await;

    let stored = store.stored(id).expect("row must exist");
    assert_eq!(stored.attribute("score"), Some(&AttributeValue::Int(40)));
    assert_eq!(stored.version, 1);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn rejoin_resumes_from_persisted_state() {
    let store = Arc::new(MemoryStore::new());
    let (cache, coordinator, handle) = spawn_core(Arc::clone(&store), BTreeMap::new());
    let id = PlayerId::new();

    handle.player_join(id, "Bob");
    wait_until("first join", || cache.get(id).is_some()).await;
    cache
        .mutate(id, |r| {
            r.set_attribute("score", 99_i64);
        })
        .expect("mutate must succeed");
    handle.player_leave(id);
    wait_until("first leave", || cache.is_empty()).await;

    handle.player_join(id, "Bob");
    wait_until("second join", || cache.get(id).is_some()).await;

    let record = cache.get(id).expect("record must be active");
    assert_eq!(record.attribute("score"), Some(&AttributeValue::Int(99)));
    assert_eq!(record.version, 1);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn degraded_session_is_never_persisted() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next_loads(u32::MAX);
    let (cache, coordinator, handle) = spawn_core(Arc::clone(&store), BTreeMap::new());
    let id = PlayerId::new();

    handle.player_join(id, "Carol");
    wait_until("degraded join", || cache.get(id).is_some()).await;
    assert!(cache.is_degraded(id));

    // Gameplay proceeds in memory.
    cache
        .mutate(id, |r| {
            r.set_attribute("score", 5_i64);
        })
        .expect("mutate must succeed");

    handle.player_leave(id);
    wait_until("degraded leave", || cache.is_empty()).await;

    // Nothing was ever written.
    assert_eq!(store.row_count(), 0);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn grace_window_bounds_a_hung_final_save() {
    let store = Arc::new(MemoryStore::new());
    let (cache, coordinator, handle) = spawn_core(Arc::clone(&store), BTreeMap::new());
    let id = PlayerId::new();

    handle.player_join(id, "Dave");
    wait_until("join to activate", || cache.get(id).is_some()).await;
    cache
        .mutate(id, |r| {
            r.set_attribute("score", 1_i64);
        })
        .expect("mutate must succeed");

    // The save now takes far longer than the 300ms grace window; the
    // entry must still be evicted promptly.
    store.set_save_delay(Duration::from_secs(30));
    let started = std::time::Instant::now();
    handle.player_leave(id);
    wait_until("eviction despite hung save", || cache.is_empty()).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    store.set_save_delay(Duration::ZERO);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn placeholders_resolve_during_a_session_and_fail_soft_after() {
    let store = Arc::new(MemoryStore::new());
    let (cache, coordinator, handle) = spawn_core(Arc::clone(&store), BTreeMap::new());
    let registry = PlaceholderRegistry::new();
    registry.register_defaults(&cache);
    registry.register_attribute(&cache, "score");
    let id = PlayerId::new();

    handle.player_join(id, "Erin");
    wait_until("join to activate", || cache.get(id).is_some()).await;
    cache
        .mutate(id, |r| {
            r.set_attribute("score", 321_i64);
        })
        .expect("mutate must succeed");

    assert_eq!(registry.resolve("name", id), "Erin");
    assert_eq!(registry.resolve("attr_score", id), "321");

    handle.player_leave(id);
    wait_until("leave to evict", || cache.is_empty()).await;

    // Offline players resolve to empty text, never an error.
    assert_eq!(registry.resolve("name", id), "");
    assert_eq!(registry.resolve("attr_score", id), "");
    coordinator.shutdown().await;
}

#[tokio::test]
async fn many_concurrent_sessions_settle_cleanly() {
    let store = Arc::new(MemoryStore::new());
    let (cache, coordinator, handle) = spawn_core(Arc::clone(&store), BTreeMap::new());

    let ids: Vec<PlayerId> = (0..10).map(|_| PlayerId::new()).collect();
    for (i, id) in ids.iter().enumerate() {
        assert!(handle.player_join(*id, &format!("Player{i}")));
    }
    wait_until("all joins", || cache.len() == ids.len()).await;

    for (i, id) in ids.iter().enumerate() {
        cache
            .mutate(*id, |r| {
                r.set_attribute("score", i64::try_from(i).unwrap_or(0));
            })
            .expect("mutate must succeed");
    }
    for id in &ids {
        handle.player_leave(*id);
    }
    wait_until("all leaves", || cache.is_empty()).await;

    assert_eq!(store.row_count(), ids.len());
    for (i, id) in ids.iter().enumerate() {
        let stored = store.stored(*id).expect("row must exist");
        assert_eq!(
            stored.attribute("score"),
            Some(&AttributeValue::Int(i64::try_from(i).unwrap_or(0)))
        );
    }
    coordinator.shutdown().await;
}
