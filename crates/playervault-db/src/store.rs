//! The record store capability trait.
//!
//! The cache depends on this seam rather than on `PostgreSQL` directly, so
//! the coherence core can be exercised against an in-memory double and the
//! storage backend can be swapped without touching cache logic.

use async_trait::async_trait;
use playervault_types::{PlayerId, PlayerRecord};

use crate::error::StoreError;

/// Persistent storage for player records.
///
/// Every operation acquires exactly one pooled connection for its duration
/// and releases it before returning, including on failure.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load the persisted record for a player.
    ///
    /// `Ok(None)` is the legitimate "no prior record" result, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on connectivity or query failure.
    async fn load(&self, player_id: PlayerId) -> Result<Option<PlayerRecord>, StoreError>;

    /// Persist a record with a compare-and-swap keyed on
    /// `(player_id, version)`.
    ///
    /// On success the stored version becomes `record.version + 1`, which is
    /// returned. A record with `version == 0` inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] if the stored version
    /// differs from `record.version`; never silently overwrites.
    async fn save(&self, record: &PlayerRecord) -> Result<u64, StoreError>;

    /// Delete a player's row. Idempotent: succeeds whether or not a row
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on connectivity or query failure.
    async fn delete(&self, player_id: PlayerId) -> Result<(), StoreError>;

    /// Resolve an offline player's identifier from a display name,
    /// case-insensitively. Names are not unique; the most recently updated
    /// row wins.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on connectivity or query failure.
    async fn find_id_by_name(&self, name: &str) -> Result<Option<PlayerId>, StoreError>;

    /// Return up to `limit` records ordered descending by a numeric
    /// attribute. Records without a numeric value under `key` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on connectivity or query failure.
    async fn top_by_attribute(
        &self,
        key: &str,
        limit: u32,
    ) -> Result<Vec<PlayerRecord>, StoreError>;
}
