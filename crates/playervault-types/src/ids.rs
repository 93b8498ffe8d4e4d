//! Type-safe identifier wrapper around [`Uuid`].
//!
//! The host runtime identifies players by a stable UUID that survives name
//! changes. Wrapping it in a newtype keeps player identifiers from being
//! mixed up with any other UUID flowing through the system at compile time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable unique identifier for a player.
///
/// Immutable for the lifetime of the account; the primary key of the
/// persisted record and the key of the in-memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Create a new identifier using UUID v7 (time-ordered).
    ///
    /// Real player identifiers come from the host runtime; this constructor
    /// exists for tests and seed data.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PlayerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<PlayerId> for Uuid {
    fn from(id: PlayerId) -> Self {
        id.0
    }
}
