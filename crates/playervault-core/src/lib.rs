//! Player cache, lifecycle coordination, and integration adapters for
//! `PlayerVault`.
//!
//! This crate owns the coherence core that sits between the host game
//! server and the data layer: an in-memory cache of online players'
//! records kept coherent with the store through join loads, periodic
//! flushes, and leave saves.
//!
//! # Modules
//!
//! - [`cache`] -- The player cache and its entry state machine.
//! - [`config`] -- YAML configuration loading into strongly-typed
//!   structs.
//! - [`error`] -- [`CacheError`].
//! - [`lifecycle`] -- Host event queue, coordinator tasks, and shutdown.
//! - [`permissions`] -- [`PermissionProvider`] capability seam and
//!   adapter.
//! - [`placeholders`] -- Named placeholder resolvers over the cache.
//! - [`plugin`] -- The [`PlayerVault`] enable/disable facade.
//! - [`testing`] -- In-memory store double for exercising the core
//!   without a database.
//!
//! [`CacheError`]: error::CacheError
//! [`PermissionProvider`]: permissions::PermissionProvider
//! [`PlayerVault`]: plugin::PlayerVault

pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod permissions;
pub mod placeholders;
pub mod plugin;
pub mod testing;
