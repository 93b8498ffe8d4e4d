//! Error types for the data layer.
//!
//! All storage failures surface as [`StoreError`]. Pool exhaustion and pool
//! closure get dedicated variants because callers treat them differently
//! from query failures: exhaustion is retryable, closure means shutdown is
//! in progress. [`StoreError::VersionConflict`] is not a failure at all but
//! the expected optimistic-concurrency signal; the cache resolves it by
//! reloading, and it must never be surfaced to in-game logic.

use playervault_types::PlayerId;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The configuration is unusable: bad connection URL, or the database
    /// was unreachable during startup validation. Fatal at initialization.
    #[error("configuration error: {0}")]
    Config(String),

    /// No pooled connection became available within the acquire timeout.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The pool has been shut down; no further operations are possible.
    #[error("connection pool closed")]
    PoolClosed,

    /// A `PostgreSQL` query failed. Transient; callers retry with backoff.
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization or deserialization of the attribute bag failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A compare-and-swap write carried a stale version. The stored record
    /// has moved on; the caller must reload before writing again.
    #[error("version conflict for player {player_id}: expected version {expected}")]
    VersionConflict {
        /// The player whose write was rejected.
        player_id: PlayerId,
        /// The version the writer believed was current.
        expected: u64,
    },
}

impl StoreError {
    /// Whether the operation is worth retrying with backoff.
    ///
    /// Query failures and pool exhaustion are transient. Configuration
    /// errors, a closed pool, and version conflicts are not: the first two
    /// need operator intervention, the last needs a reload.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Postgres(_) | Self::PoolExhausted)
    }

    /// Whether this is the optimistic-concurrency rejection signal.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    /// Route pool lifecycle errors to their dedicated variants so retry
    /// policy can distinguish them from query failures.
    fn from(source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::PoolTimedOut => Self::PoolExhausted,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            other => Self::Postgres(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_dedicated_variants() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::PoolExhausted
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::PoolClosed
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Postgres(_)
        ));
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::PoolExhausted.is_transient());
        assert!(StoreError::from(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::PoolClosed.is_transient());
        assert!(!StoreError::Config(String::from("bad url")).is_transient());
        let conflict = StoreError::VersionConflict {
            player_id: PlayerId::new(),
            expected: 3,
        };
        assert!(!conflict.is_transient());
        assert!(conflict.is_conflict());
    }

    #[test]
    fn conflict_display_names_player_and_version() {
        let id = PlayerId::new();
        let err = StoreError::VersionConflict {
            player_id: id,
            expected: 7,
        };
        let msg = format!("{err}");
        assert!(msg.contains(&format!("{id}")));
        assert!(msg.contains('7'));
    }
}
