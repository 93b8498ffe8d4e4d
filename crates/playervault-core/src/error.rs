//! Error types for the coherence core.
//!
//! Storage failures stop at the cache boundary: `get` never fails and
//! `mutate` fails only for the programmer error of touching an offline
//! player. Flush results carry [`CacheError::Store`] so the lifecycle
//! coordinator can log degraded persistence, but nothing here ever
//! propagates to in-game logic as a gameplay failure.

use playervault_db::StoreError;
use playervault_types::PlayerId;

/// Errors that can occur in the player cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The player has no active cache entry. Calling code mutated a record
    /// for a player who is not online; this is a programmer error, not a
    /// runtime condition to retry.
    #[error("no active cache entry for player {0}")]
    NoActiveEntry(PlayerId),

    /// A storage operation failed after retries.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
