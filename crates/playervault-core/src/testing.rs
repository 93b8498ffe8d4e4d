//! An in-memory [`RecordStore`] double for exercising the coherence core
//! without a database.
//!
//! Supports failure injection (a countdown of operations that will fail
//! with a transient error) and an artificial save delay, which the grace
//! window tests use to force an eviction timeout. Behavior mirrors the
//! `PostgreSQL` implementation: compare-and-swap saves, idempotent
//! deletes, case-insensitive name lookup.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use playervault_db::{RecordStore, StoreError};
use playervault_types::{PlayerId, PlayerRecord};

/// In-memory record store with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<PlayerId, PlayerRecord>>,
    fail_loads: AtomicU32,
    fail_saves: AtomicU32,
    save_delay_ms: AtomicU32,
}

/// Decrement the counter if positive, reporting whether a failure should
/// be injected.
fn consume(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
        .is_ok()
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` loads fail with a transient error.
    pub fn fail_next_loads(&self, count: u32) {
        self.fail_loads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` saves fail with a transient error.
    pub fn fail_next_saves(&self, count: u32) {
        self.fail_saves.store(count, Ordering::SeqCst);
    }

    /// Delay every save by `delay`, to simulate a slow database.
    pub fn set_save_delay(&self, delay: Duration) {
        let ms = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
        self.save_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Seed a row directly, bypassing the compare-and-swap.
    pub fn seed(&self, record: PlayerRecord) {
        self.lock_rows().insert(record.player_id, record);
    }

    /// Return the stored row for a player, if any.
    pub fn stored(&self, player_id: PlayerId) -> Option<PlayerRecord> {
        self.lock_rows().get(&player_id).cloned()
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> usize {
        self.lock_rows().len()
    }

    fn lock_rows(&self) -> std::sync::MutexGuard<'_, HashMap<PlayerId, PlayerRecord>> {
        self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load(&self, player_id: PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        if consume(&self.fail_loads) {
            return Err(StoreError::PoolExhausted);
        }
        Ok(self.lock_rows().get(&player_id).cloned())
    }

    async fn save(&self, record: &PlayerRecord) -> Result<u64, StoreError> {
        let delay_ms = self.save_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(u64::from(delay_ms))).await;
        }
        if consume(&self.fail_saves) {
            return Err(StoreError::PoolExhausted);
        }

        let mut rows = self.lock_rows();
        let current = rows.get(&record.player_id).map_or(0, |r| r.version);
        if current != record.version {
            return Err(StoreError::VersionConflict {
                player_id: record.player_id,
                expected: record.version,
            });
        }

        let next = record.version.saturating_add(1);
        let mut committed = record.clone();
        committed.version = next;
        rows.insert(record.player_id, committed);
        Ok(next)
    }

    async fn delete(&self, player_id: PlayerId) -> Result<(), StoreError> {
        self.lock_rows().remove(&player_id);
        Ok(())
    }

    async fn find_id_by_name(&self, name: &str) -> Result<Option<PlayerId>, StoreError> {
        let rows = self.lock_rows();
        Ok(rows
            .values()
            .find(|r| r.display_name.eq_ignore_ascii_case(name))
            .map(|r| r.player_id))
    }

    async fn top_by_attribute(
        &self,
        key: &str,
        limit: u32,
    ) -> Result<Vec<PlayerRecord>, StoreError> {
        let rows = self.lock_rows();
        let mut scored: Vec<(f64, PlayerRecord)> = rows
            .values()
            .filter_map(|r| {
                r.attribute(key)
                    .and_then(playervault_types::AttributeValue::as_number)
                    .map(|n| (n, r.clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(core::cmp::Ordering::Equal));
        scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }
}
