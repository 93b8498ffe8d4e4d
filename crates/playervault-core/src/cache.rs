//! The player cache: the coherence core between in-game logic and the
//! record store.
//!
//! One entry exists per online player. In-game logic reads and writes the
//! entry synchronously (`get`, `mutate`); background tasks reconcile it
//! with the store asynchronously (`flush`, join loads, leave saves).
//! Gameplay never waits on the database: a mutation marks the entry dirty
//! and returns immediately, and an unreachable database degrades the
//! session to ephemeral instead of blocking the player.
//!
//! # Entry lifecycle
//!
//! ```text
//! join --> Loading --> Active <--> (background flush)
//!                        |
//! leave ---------------> Saving --> Evicted (save confirmed or grace
//!                                            window elapsed)
//! ```
//!
//! # Locking
//!
//! Two locks per entry, with distinct jobs:
//!
//! - a `std::sync::Mutex` over the entry state, held only for in-memory
//!   reads and writes, never across an await point;
//! - a `tokio::sync::Mutex` I/O gate, held for the duration of a load or
//!   save, so per-player store operations are totally ordered.
//!
//! A flush snapshots the record under the state lock, then saves the
//! snapshot while holding only the I/O gate, so a concurrent `mutate` is
//! never blocked by in-flight I/O. The mutation sequence number decides
//! whether the flush may clear the dirty flag afterwards; a mutation that
//! raced the save is simply captured by the next cycle.
//!
//! The entry map itself is guarded separately (insert on join, remove on
//! evict), independent of per-entry state mutation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use playervault_db::RecordStore;
use playervault_types::{AttributeValue, PlayerId, PlayerRecord};
use tokio::sync::Mutex as IoMutex;

use crate::config::CacheConfig;
use crate::error::CacheError;

/// The in-memory side of one online player's record.
#[derive(Debug)]
struct ActiveRecord {
    /// The authoritative in-memory copy.
    record: PlayerRecord,
    /// Whether the copy has mutations not yet persisted.
    dirty: bool,
    /// Degraded sessions were materialized without a reachable store and
    /// are never flushed.
    degraded: bool,
    /// Bumped on every mutation; lets a completing flush detect whether
    /// the saved snapshot is still the latest state.
    mutation_seq: u64,
}

/// Per-entry state machine.
#[derive(Debug)]
enum EntryState {
    /// The join-time load is in flight; no record to serve yet.
    Loading,
    /// The player is online and the record is served from memory.
    Active(ActiveRecord),
    /// The player left; the final save is in flight.
    Saving(ActiveRecord),
    /// The entry is dead. A terminal state; any straggling task that
    /// still holds the entry must treat it as gone.
    Evicted,
}

/// One cache entry. Shared between the map and in-flight I/O tasks.
struct CacheEntry {
    player_id: PlayerId,
    state: Mutex<EntryState>,
    /// Serializes loads and saves for this player.
    io_gate: IoMutex<()>,
}

impl CacheEntry {
    fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            state: Mutex::new(EntryState::Loading),
            io_gate: IoMutex::new(()),
        }
    }

    /// Lock the state mutex, recovering from a poisoned lock. The state
    /// is a plain value; a panicking holder cannot leave it torn.
    fn lock_state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of a flush for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to do; the entry had no unsaved mutations.
    Clean,
    /// The snapshot was committed at this version.
    Saved {
        /// The newly committed version.
        version: u64,
    },
    /// The store had moved on; the stored record was adopted as the new
    /// baseline and local changes were discarded.
    ConflictResolved {
        /// The adopted stored version (`0` if the row had been deleted).
        version: u64,
    },
    /// The entry is degraded (not persisted) and was skipped.
    SkippedDegraded,
}

/// Tally of a full-cache flush sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries committed to the store.
    pub saved: u64,
    /// Entries with nothing to save.
    pub clean: u64,
    /// Entries rebaselined after a version conflict.
    pub conflicts: u64,
    /// Degraded entries skipped.
    pub degraded: u64,
    /// Entries whose save failed after retries; still dirty, picked up
    /// by the next sweep.
    pub failed: u64,
}

/// Handoff between the synchronous registration of a join and its
/// asynchronous load. Produced by [`PlayerCache::register_join`] and
/// consumed by [`PlayerCache::complete_join`]; splitting the phases lets
/// a driver keep per-player event ordering while running the I/O in the
/// background.
pub struct JoinHandoff {
    entry: Arc<CacheEntry>,
    prior: Option<Arc<CacheEntry>>,
    display_name: String,
}

/// Handoff between the synchronous part of a leave and its asynchronous
/// final save. See [`JoinHandoff`].
pub struct LeaveHandoff {
    entry: Arc<CacheEntry>,
}

/// The process-scoped registry of online players' records.
///
/// Constructed once at plugin enable, torn down (after a final flush) at
/// plugin disable. All methods take `&self`; the cache is internally
/// synchronized and safe to share across threads behind an [`Arc`].
pub struct PlayerCache {
    store: Arc<dyn RecordStore>,
    config: CacheConfig,
    /// Attribute defaults seeded into brand-new records.
    defaults: BTreeMap<String, AttributeValue>,
    entries: RwLock<HashMap<PlayerId, Arc<CacheEntry>>>,
}

impl PlayerCache {
    /// Create an empty cache over the given store.
    pub fn new(
        store: Arc<dyn RecordStore>,
        config: CacheConfig,
        defaults: BTreeMap<String, AttributeValue>,
    ) -> Self {
        Self {
            store,
            config,
            defaults,
            entries: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Synchronous surface (main-thread safe, never blocks on I/O)
    // =========================================================================

    /// Snapshot the current in-memory record for a player.
    ///
    /// Returns `None` while the join load is still in flight, and for
    /// players with no entry at all. Non-blocking.
    pub fn get(&self, player_id: PlayerId) -> Option<PlayerRecord> {
        let entry = self.entry(player_id)?;
        let state = entry.lock_state();
        match &*state {
            EntryState::Active(active) | EntryState::Saving(active) => {
                Some(active.record.clone())
            }
            EntryState::Loading | EntryState::Evicted => None,
        }
    }

    /// Whether a player's session is degraded (serving an ephemeral
    /// record that will not be persisted).
    pub fn is_degraded(&self, player_id: PlayerId) -> bool {
        self.entry(player_id).is_some_and(|entry| {
            match &*entry.lock_state() {
                EntryState::Active(active) | EntryState::Saving(active) => active.degraded,
                EntryState::Loading | EntryState::Evicted => false,
            }
        })
    }

    /// Apply a transformation to a player's record under per-entry
    /// exclusive access, mark it dirty, and return the updated snapshot.
    ///
    /// The read-modify-write is atomic per call and never blocked by an
    /// in-flight flush of the same player.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoActiveEntry`] if the player is not online
    /// with a fully loaded entry.
    pub fn mutate<F>(&self, player_id: PlayerId, mutation: F) -> Result<PlayerRecord, CacheError>
    where
        F: FnOnce(&mut PlayerRecord),
    {
        let entry = self
            .entry(player_id)
            .ok_or(CacheError::NoActiveEntry(player_id))?;
        let mut state = entry.lock_state();
        match &mut *state {
            EntryState::Active(active) => {
                mutation(&mut active.record);
                active.dirty = true;
                active.mutation_seq = active.mutation_seq.wrapping_add(1);
                Ok(active.record.clone())
            }
            EntryState::Loading | EntryState::Saving(_) | EntryState::Evicted => {
                Err(CacheError::NoActiveEntry(player_id))
            }
        }
    }

    /// Identifiers of every player with a cache entry.
    pub fn online_ids(&self) -> Vec<PlayerId> {
        self.read_entries().keys().copied().collect()
    }

    /// Number of cache entries, including those still loading or saving.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    // =========================================================================
    // Join
    // =========================================================================

    /// Synchronous phase of a player join: install a `Loading` entry.
    ///
    /// If a grace-window survivor from a fast rejoin is still present it
    /// is replaced here; [`PlayerCache::complete_join`] orders the new
    /// load behind the survivor's in-flight save.
    pub fn register_join(&self, player_id: PlayerId, display_name: &str) -> JoinHandoff {
        let entry = Arc::new(CacheEntry::new(player_id));
        let prior = self
            .write_entries()
            .insert(player_id, Arc::clone(&entry));
        if prior.is_some() {
            tracing::debug!(%player_id, "Rejoined before previous entry was evicted");
        }
        JoinHandoff {
            entry,
            prior,
            display_name: display_name.to_owned(),
        }
    }

    /// Asynchronous phase of a player join: load the record (with bounded
    /// retries) and activate the entry.
    ///
    /// A missing row materializes a default record seeded from the
    /// configured defaults. A store that stays unreachable through the
    /// retry budget materializes the same default as a degraded,
    /// ephemeral session so the player is not blocked from playing.
    pub async fn complete_join(&self, handoff: JoinHandoff) {
        let JoinHandoff {
            entry,
            prior,
            display_name,
        } = handoff;
        let player_id = entry.player_id;

        if let Some(prior) = prior {
            // Order behind the previous session's in-flight save, then
            // make sure any straggler treats the old entry as gone.
            let _ordering = prior.io_gate.lock().await;
            let mut prior_state = prior.lock_state();
            // A leave-path replacement arrives here Evicted (or Saving
            // with its loss already logged); a duplicate join over an
            // Active entry is the host misbehaving, and discarding its
            // unsaved changes must not be silent.
            if matches!(
                &*prior_state,
                EntryState::Active(active) if active.dirty && !active.degraded
            ) {
                tracing::warn!(
                    %player_id,
                    "Duplicate join replaced an active entry; its unsaved changes are lost"
                );
            }
            *prior_state = EntryState::Evicted;
        }

        let _gate = entry.io_gate.lock().await;

        let mut attempt: u32 = 1;
        let loaded = loop {
            match self.store.load(player_id).await {
                Ok(found) => break Ok(found),
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts => {
                    tracing::warn!(%player_id, attempt, error = %e, "Load failed, retrying");
                    tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => break Err(e),
            }
        };

        let active = match loaded {
            Ok(Some(mut record)) => {
                // Re-stamp the last-known name; players rename between
                // sessions.
                let renamed = record.display_name != display_name;
                if renamed {
                    record.display_name = display_name;
                }
                tracing::debug!(%player_id, version = record.version, "Loaded player record");
                ActiveRecord {
                    record,
                    dirty: renamed,
                    degraded: false,
                    mutation_seq: 0,
                }
            }
            Ok(None) => {
                tracing::debug!(%player_id, "No prior record, materializing defaults");
                let record =
                    PlayerRecord::new(player_id, display_name).with_attributes(&self.defaults);
                ActiveRecord {
                    record,
                    dirty: true,
                    degraded: false,
                    mutation_seq: 0,
                }
            }
            Err(e) => {
                tracing::error!(
                    %player_id,
                    error = %e,
                    "Load failed after retries; session is degraded (not persisted)"
                );
                let record =
                    PlayerRecord::new(player_id, display_name).with_attributes(&self.defaults);
                ActiveRecord {
                    record,
                    dirty: false,
                    degraded: true,
                    mutation_seq: 0,
                }
            }
        };

        let mut state = entry.lock_state();
        if matches!(&*state, EntryState::Evicted) {
            // The player left again while the load was in flight; the
            // leave path already removed the entry.
            tracing::debug!(%player_id, "Discarding load result for evicted entry");
            return;
        }
        *state = EntryState::Active(active);
    }

    /// Register and load in one call, for callers that do not need the
    /// split phases.
    pub async fn handle_join(&self, player_id: PlayerId, display_name: &str) {
        let handoff = self.register_join(player_id, display_name);
        self.complete_join(handoff).await;
    }

    // =========================================================================
    // Leave
    // =========================================================================

    /// Synchronous phase of a player leave: transition the entry to
    /// `Saving`.
    ///
    /// Returns `None` when there is nothing to save: the player was not
    /// cached, was still loading (the pending load result is discarded),
    /// or a leave is already in progress.
    pub fn begin_leave(&self, player_id: PlayerId) -> Option<LeaveHandoff> {
        let entry = self.entry(player_id)?;
        let mut state = entry.lock_state();
        match std::mem::replace(&mut *state, EntryState::Evicted) {
            EntryState::Active(active) => {
                *state = EntryState::Saving(active);
                drop(state);
                Some(LeaveHandoff { entry })
            }
            EntryState::Loading => {
                // Left before the load finished. The state stays Evicted
                // so the load result is discarded.
                drop(state);
                self.remove_if_same(player_id, &entry);
                tracing::debug!(%player_id, "Left before load completed");
                None
            }
            EntryState::Saving(active) => {
                *state = EntryState::Saving(active);
                None
            }
            EntryState::Evicted => None,
        }
    }

    /// Asynchronous phase of a player leave: run the final save, bounded
    /// by the grace window, then evict the entry.
    ///
    /// The entry is removed from memory whether the save succeeded,
    /// failed, or timed out; losing unsaved data is logged, never silent.
    pub async fn complete_leave(&self, handoff: LeaveHandoff) {
        let entry = handoff.entry;
        let player_id = entry.player_id;
        let grace = self.config.leave_grace();

        match tokio::time::timeout(grace, self.flush_entry(&entry)).await {
            Ok(Ok(outcome)) => {
                tracing::debug!(%player_id, ?outcome, "Final save complete");
            }
            Ok(Err(e)) => {
                tracing::error!(
                    %player_id,
                    error = %e,
                    "Final save failed; unsaved changes lost"
                );
            }
            Err(_) => {
                tracing::error!(
                    %player_id,
                    grace_ms = self.config.leave_grace_ms,
                    "Grace window elapsed before final save completed; unsaved changes lost"
                );
            }
        }

        *entry.lock_state() = EntryState::Evicted;
        self.remove_if_same(player_id, &entry);
    }

    /// Transition and save in one call, for callers that do not need the
    /// split phases.
    pub async fn handle_leave(&self, player_id: PlayerId) {
        if let Some(handoff) = self.begin_leave(player_id) {
            self.complete_leave(handoff).await;
        }
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Persist a player's dirty snapshot.
    ///
    /// Takes a point-in-time snapshot and saves it without holding the
    /// state lock; concurrent mutations proceed and are captured by the
    /// next cycle. A version conflict is resolved by adopting the stored
    /// record as the new baseline. Transient failures retry with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoActiveEntry`] if the player is not cached,
    /// or [`CacheError::Store`] if the save kept failing through the
    /// retry budget; the entry stays dirty for the next sweep.
    pub async fn flush(&self, player_id: PlayerId) -> Result<FlushOutcome, CacheError> {
        let entry = self
            .entry(player_id)
            .ok_or(CacheError::NoActiveEntry(player_id))?;
        self.flush_entry(&entry).await
    }

    /// Flush every cache entry, returning a tally.
    ///
    /// Entries are flushed one at a time; per-player ordering comes from
    /// the I/O gates, and the pool bounds cross-player concurrency for
    /// the loads that conflict resolution may issue.
    pub async fn flush_all(&self) -> FlushReport {
        let entries: Vec<Arc<CacheEntry>> = self.read_entries().values().cloned().collect();
        let mut report = FlushReport::default();
        for entry in entries {
            match self.flush_entry(&entry).await {
                Ok(FlushOutcome::Saved { .. }) => {
                    report.saved = report.saved.saturating_add(1);
                }
                Ok(FlushOutcome::Clean) => {
                    report.clean = report.clean.saturating_add(1);
                }
                Ok(FlushOutcome::ConflictResolved { .. }) => {
                    report.conflicts = report.conflicts.saturating_add(1);
                }
                Ok(FlushOutcome::SkippedDegraded) => {
                    report.degraded = report.degraded.saturating_add(1);
                }
                Err(CacheError::NoActiveEntry(_)) => {
                    // Evicted between the snapshot of the map and the
                    // flush; nothing to count.
                }
                Err(e) => {
                    tracing::warn!(player_id = %entry.player_id, error = %e, "Flush failed");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }
        report
    }

    async fn flush_entry(&self, entry: &Arc<CacheEntry>) -> Result<FlushOutcome, CacheError> {
        let _gate = entry.io_gate.lock().await;

        let (snapshot, seq) = {
            let state = entry.lock_state();
            match &*state {
                EntryState::Active(active) | EntryState::Saving(active) => {
                    if active.degraded {
                        return Ok(FlushOutcome::SkippedDegraded);
                    }
                    if !active.dirty {
                        return Ok(FlushOutcome::Clean);
                    }
                    (active.record.clone(), active.mutation_seq)
                }
                EntryState::Loading | EntryState::Evicted => {
                    return Err(CacheError::NoActiveEntry(entry.player_id));
                }
            }
        };

        let mut attempt: u32 = 1;
        loop {
            match self.store.save(&snapshot).await {
                Ok(version) => {
                    let mut state = entry.lock_state();
                    if let EntryState::Active(active) | EntryState::Saving(active) = &mut *state
                    {
                        active.record.version = version;
                        if active.mutation_seq == seq {
                            active.dirty = false;
                        }
                    }
                    tracing::debug!(player_id = %entry.player_id, version, "Flushed player record");
                    return Ok(FlushOutcome::Saved { version });
                }
                Err(e) if e.is_conflict() => {
                    tracing::warn!(
                        player_id = %entry.player_id,
                        error = %e,
                        "Version conflict, adopting stored record"
                    );
                    return self.adopt_stored(entry).await;
                }
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts => {
                    tracing::warn!(
                        player_id = %entry.player_id,
                        attempt,
                        error = %e,
                        "Save failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(CacheError::Store(e)),
            }
        }
    }

    /// Conflict resolution: reload the authoritative record and accept it
    /// as the new baseline, discarding local changes.
    async fn adopt_stored(&self, entry: &Arc<CacheEntry>) -> Result<FlushOutcome, CacheError> {
        let stored = self.store.load(entry.player_id).await?;
        let mut state = entry.lock_state();
        match &mut *state {
            EntryState::Active(active) | EntryState::Saving(active) => match stored {
                Some(record) => {
                    let version = record.version;
                    tracing::warn!(
                        player_id = %entry.player_id,
                        version,
                        "Local changes discarded in favor of stored record"
                    );
                    active.record = record;
                    active.dirty = false;
                    Ok(FlushOutcome::ConflictResolved { version })
                }
                None => {
                    // The row was deleted out from under us. Rebase as
                    // never-persisted; the next sweep re-inserts.
                    active.record.version = 0;
                    active.dirty = true;
                    Ok(FlushOutcome::ConflictResolved { version: 0 })
                }
            },
            EntryState::Loading | EntryState::Evicted => {
                Err(CacheError::NoActiveEntry(entry.player_id))
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Drop every entry without saving. Call [`PlayerCache::flush_all`]
    /// first during an orderly shutdown.
    pub fn clear(&self) {
        let mut entries = self.write_entries();
        for entry in entries.values() {
            *entry.lock_state() = EntryState::Evicted;
        }
        let count = entries.len();
        entries.clear();
        if count > 0 {
            tracing::info!(count, "Cache cleared");
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn entry(&self, player_id: PlayerId) -> Option<Arc<CacheEntry>> {
        self.read_entries().get(&player_id).cloned()
    }

    /// Remove the map entry only if it is still this exact entry; a fast
    /// rejoin may have replaced it already.
    fn remove_if_same(&self, player_id: PlayerId, entry: &Arc<CacheEntry>) {
        let mut entries = self.write_entries();
        if entries
            .get(&player_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(&player_id);
        }
    }

    fn read_entries(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<PlayerId, Arc<CacheEntry>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<PlayerId, Arc<CacheEntry>>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
