//! Shared type definitions for the PlayerVault data core.
//!
//! This crate holds the data model every other `PlayerVault` crate agrees
//! on: the typed player identifier, the scalar attribute value, and the
//! per-player record that the cache keeps in memory and the data layer
//! persists. It deliberately depends on nothing heavier than [`serde`]
//! and [`uuid`] so that both the storage layer and the host-facing core
//! can use it without pulling in the other's stack.
//!
//! # Modules
//!
//! - [`ids`] -- the [`PlayerId`] newtype
//! - [`record`] -- [`PlayerRecord`] and [`AttributeValue`]

pub mod ids;
pub mod record;

// Re-export primary types for convenience.
pub use ids::PlayerId;
pub use record::{AttributeValue, PlayerRecord};
