//! Lifecycle coordination between the host game server and the cache.
//!
//! The host delivers join and leave signals from its own threads;
//! [`HostHandle`] accepts them without blocking and feeds a bounded queue.
//! A single coordinator task consumes the queue in arrival order and runs
//! the synchronous cache transition for each event inline, so the relative
//! order of one player's join and leave is preserved even though the
//! I/O those transitions kick off runs concurrently across players.
//!
//! ```text
//! host thread --> HostHandle::player_join --> [bounded queue]
//!                                                  |
//!                                           event loop task
//!                                          /               \
//!                              register_join (sync)   begin_leave (sync)
//!                              complete_join (I/O)    complete_leave (I/O)
//! ```
//!
//! A second task sweeps the cache on the configured flush interval.
//! [`LifecycleCoordinator::shutdown`] drains queued events, waits for
//! in-flight session I/O, runs a final full flush, and clears the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use playervault_types::PlayerId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cache::{FlushReport, PlayerCache};
use crate::config::CacheConfig;

/// A session signal delivered by the host server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A player connected.
    Join {
        /// The joining player.
        player_id: PlayerId,
        /// The player's current display name.
        display_name: String,
    },
    /// A player disconnected.
    Leave {
        /// The leaving player.
        player_id: PlayerId,
    },
}

/// Cheap, cloneable handle for delivering session signals from host
/// threads.
///
/// Delivery never blocks: when the queue is full the event is dropped
/// and logged, which the host tolerates better than a stalled tick.
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<HostEvent>,
}

impl HostHandle {
    /// Signal that a player connected. Returns whether the event was
    /// accepted.
    pub fn player_join(&self, player_id: PlayerId, display_name: &str) -> bool {
        self.send(HostEvent::Join {
            player_id,
            display_name: display_name.to_owned(),
        })
    }

    /// Signal that a player disconnected. Returns whether the event was
    /// accepted.
    pub fn player_leave(&self, player_id: PlayerId) -> bool {
        self.send(HostEvent::Leave { player_id })
    }

    fn send(&self, event: HostEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "Event queue full, dropping host event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!(?event, "Coordinator stopped, dropping host event");
                false
            }
        }
    }
}

/// Owner of the background tasks that keep the cache coherent.
///
/// Spawned once at plugin enable. Dropping it without calling
/// [`LifecycleCoordinator::shutdown`] leaves dirty entries unsaved.
pub struct LifecycleCoordinator {
    cache: Arc<PlayerCache>,
    shutdown: watch::Sender<bool>,
    events: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl LifecycleCoordinator {
    /// Spawn the event loop and the periodic flush sweeper.
    ///
    /// Returns the coordinator and the handle the host adapter delivers
    /// events through.
    pub fn spawn(cache: Arc<PlayerCache>, config: &CacheConfig) -> (Self, HostHandle) {
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let events = tokio::spawn(event_loop(Arc::clone(&cache), rx, shutdown_rx.clone()));
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&cache),
            config.flush_interval(),
            shutdown_rx,
        ));

        tracing::info!(
            flush_interval_secs = config.flush_interval_secs,
            event_queue_capacity = config.event_queue_capacity,
            "Lifecycle coordinator started"
        );

        (
            Self {
                cache,
                shutdown,
                events,
                sweeper,
            },
            HostHandle { tx },
        )
    }

    /// Stop the background tasks, run a final full flush, and clear the
    /// cache.
    ///
    /// Events already queued are still processed, and in-flight session
    /// I/O is awaited, before the final flush runs. Returns the final
    /// flush tally.
    pub async fn shutdown(self) -> FlushReport {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.events.await {
            tracing::error!(error = %e, "Event loop task failed during shutdown");
        }
        self.sweeper.abort();

        let report = self.cache.flush_all().await;
        if report.failed > 0 {
            tracing::error!(
                failed = report.failed,
                "Final flush left unsaved entries; their changes are lost"
            );
        }
        tracing::info!(
            saved = report.saved,
            clean = report.clean,
            conflicts = report.conflicts,
            degraded = report.degraded,
            failed = report.failed,
            "Final flush complete"
        );
        self.cache.clear();
        report
    }
}

/// The tail of one player's chain of I/O continuations.
type SessionTasks = HashMap<PlayerId, JoinHandle<()>>;

/// Consume host events in arrival order.
///
/// The synchronous cache transition for each event happens inline here;
/// the I/O continuation is spawned so a slow load or save never delays
/// later events. Continuations for the same player are chained (each
/// awaits the previous one) so a fast leave-then-rejoin runs its load
/// strictly after the previous session's final save. Different players'
/// chains run concurrently.
async fn event_loop(
    cache: Arc<PlayerCache>,
    mut rx: mpsc::Receiver<HostEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions: SessionTasks = HashMap::new();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => dispatch(&cache, &mut sessions, event),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    // Process events that were queued before the stop signal, then wait
    // for every in-flight continuation.
    while let Ok(event) = rx.try_recv() {
        dispatch(&cache, &mut sessions, event);
    }
    for (player_id, task) in sessions.drain() {
        await_previous(player_id, task).await;
    }
}

/// Await the previous link of a player's continuation chain, surfacing
/// panics.
async fn await_previous(player_id: PlayerId, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        tracing::error!(%player_id, error = %e, "Session I/O task failed");
    }
}

fn dispatch(cache: &Arc<PlayerCache>, sessions: &mut SessionTasks, event: HostEvent) {
    sessions.retain(|_, task| !task.is_finished());
    match event {
        HostEvent::Join {
            player_id,
            display_name,
        } => {
            let handoff = cache.register_join(player_id, &display_name);
            let previous = sessions.remove(&player_id);
            let cache = Arc::clone(cache);
            let task = tokio::spawn(async move {
                if let Some(previous) = previous {
                    await_previous(player_id, previous).await;
                }
                cache.complete_join(handoff).await;
            });
            sessions.insert(player_id, task);
        }
        HostEvent::Leave { player_id } => {
            if let Some(handoff) = cache.begin_leave(player_id) {
                let previous = sessions.remove(&player_id);
                let cache = Arc::clone(cache);
                let task = tokio::spawn(async move {
                    if let Some(previous) = previous {
                        await_previous(player_id, previous).await;
                    }
                    cache.complete_leave(handoff).await;
                });
                sessions.insert(player_id, task);
            }
        }
    }
}

/// Flush the whole cache on a fixed interval until told to stop.
async fn sweep_loop(
    cache: Arc<PlayerCache>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; consume it so
    // the first sweep happens one full interval after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = cache.flush_all().await;
                if report.saved > 0 || report.conflicts > 0 || report.failed > 0 {
                    tracing::info!(
                        saved = report.saved,
                        clean = report.clean,
                        conflicts = report.conflicts,
                        degraded = report.degraded,
                        failed = report.failed,
                        "Periodic flush sweep"
                    );
                } else {
                    tracing::debug!(clean = report.clean, "Periodic flush sweep, nothing dirty");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use std::collections::BTreeMap;

    use playervault_types::AttributeValue;

    use super::*;
    use crate::testing::MemoryStore;

    fn test_config() -> CacheConfig {
        CacheConfig {
            flush_interval_secs: 3600,
            leave_grace_ms: 500,
            retry_attempts: 3,
            retry_backoff_ms: 1,
            event_queue_capacity: 16,
        }
    }

    fn spawn_over(store: Arc<MemoryStore>) -> (Arc<PlayerCache>, LifecycleCoordinator, HostHandle) {
        let cache = Arc::new(PlayerCache::new(store, test_config(), BTreeMap::new()));
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
    async fn join_event_activates_player() {
        let store = Arc::new(MemoryStore::new());
        let (cache, coordinator, handle) = spawn_over(store);
        let id = PlayerId::new();

        assert!(handle.player_join(id, "Alice"));
        wait_until("join to activate", || cache.get(id).is_some()).await;

        let record = cache.get(id).expect("record must be active");
        assert_eq!(record.display_name, "Alice");
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn leave_event_persists_and_evicts() {
        let store = Arc::new(MemoryStore::new());
        let (cache, coordinator, handle) = spawn_over(Arc::clone(&store));
        let id = PlayerId::new();

        handle.player_join(id, "Bob");
        wait_until("join to activate", || cache.get(id).is_some()).await;
        cache
            .mutate(id, |r| {
                r.set_attribute("score", 42_i64);
            })
            .expect("mutate must succeed");

        handle.player_leave(id);
        wait_until("leave to evict", || cache.is_empty()).await;

        let stored = store.stored(id).expect("row must exist");
        assert_eq!(stored.attribute("score"), Some(&AttributeValue::Int(42)));
        assert_eq!(stored.version, 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn join_and_leave_in_quick_succession_stay_ordered() {
        let store = Arc::new(MemoryStore::new());
        let (cache, coordinator, handle) = spawn_over(Arc::clone(&store));
        let id = PlayerId::new();

        // Deliver both before the loop can run either; the leave must
        // still observe the join.
        handle.player_join(id, "Carol");
        handle.player_leave(id);
        wait_until("session to complete", || cache.is_empty()).await;

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn rejoin_load_is_ordered_after_final_save() {
        let store = Arc::new(MemoryStore::new());
        let (cache, coordinator, handle) = spawn_over(Arc::clone(&store));
        let id = PlayerId::new();

        handle.player_join(id, "Dana");
        wait_until("join to activate", || cache.get(id).is_some()).await;
        cache
            .mutate(id, |r| {
                r.set_attribute("score", 13_i64);
            })
            .expect("mutate must succeed");

        // Leave and rejoin back to back: the rejoin's load must observe
        // the final save, not a stale (or missing) row.
        handle.player_leave(id);
        handle.player_join(id, "Dana");
        wait_until("rejoin to activate", || {
            cache.get(id).is_some_and(|r| r.version == 1)
        })
        .await;

        let record = cache.get(id).expect("record must be active");
        assert_eq!(record.attribute("score"), Some(&AttributeValue::Int(13)));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_drops_events_without_blocking() {
        // A handle over a queue nobody drains.
        let (tx, rx) = mpsc::channel(1);
        let handle = HostHandle { tx };
        let id = PlayerId::new();

        assert!(handle.player_join(id, "Dave"));
        assert!(!handle.player_leave(id));
        drop(rx);
        assert!(!handle.player_leave(id));
    }

    #[tokio::test]
    async fn shutdown_flushes_dirty_entries() {
        let store = Arc::new(MemoryStore::new());
        let (cache, coordinator, handle) = spawn_over(Arc::clone(&store));
        let id = PlayerId::new();

        handle.player_join(id, "Erin");
        wait_until("join to activate", || cache.get(id).is_some()).await;
        cache
            .mutate(id, |r| {
                r.set_attribute("score", 7_i64);
            })
            .expect("mutate must succeed");

        let report = coordinator.shutdown().await;
        assert_eq!(report.saved, 1);
        assert!(cache.is_empty());
        let stored = store.stored(id).expect("row must exist");
        assert_eq!(stored.attribute("score"), Some(&AttributeValue::Int(7)));
    }

    #[tokio::test]
    async fn shutdown_processes_already_queued_events() {
        let store = Arc::new(MemoryStore::new());
        let (cache, coordinator, handle) = spawn_over(Arc::clone(&store));
        let id = PlayerId::new();

        handle.player_join(id, "Frank");
        // Shut down immediately; the queued join must still be processed
        // (and its default record saved by the final flush).
        let report = coordinator.shutdown().await;
        assert_eq!(report.saved, 1);
        assert!(store.stored(id).is_some());
        assert!(cache.is_empty());
    }
}
