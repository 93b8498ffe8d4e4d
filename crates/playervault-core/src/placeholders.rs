//! Placeholder resolution over the player cache.
//!
//! The host's text-templating service calls back into the core with a
//! placeholder name and a player, expecting a string in return, always,
//! synchronously, on its own thread. Every resolver here therefore reads
//! only from the in-memory cache and fails soft: an unknown placeholder
//! or an offline player yields an empty string, never an error and never
//! a database round trip.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use playervault_types::PlayerId;

use crate::cache::PlayerCache;

type Resolver = Box<dyn Fn(PlayerId) -> String + Send + Sync>;

/// Named placeholder resolvers, registered at enable and consulted by
/// the host's templating service on demand.
#[derive(Default)]
pub struct PlaceholderRegistry {
    resolvers: RwLock<HashMap<String, Resolver>>,
}

impl PlaceholderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver under a name, replacing any previous one.
    pub fn register<F>(&self, name: &str, resolver: F)
    where
        F: Fn(PlayerId) -> String + Send + Sync + 'static,
    {
        let replaced = self
            .write_resolvers()
            .insert(name.to_owned(), Box::new(resolver))
            .is_some();
        if replaced {
            tracing::debug!(name, "Placeholder resolver replaced");
        } else {
            tracing::debug!(name, "Placeholder resolver registered");
        }
    }

    /// Install the built-in `name` placeholder (the player's display
    /// name).
    pub fn register_defaults(&self, cache: &Arc<PlayerCache>) {
        let cache = Arc::clone(cache);
        self.register("name", move |player_id| {
            cache
                .get(player_id)
                .map(|record| record.display_name)
                .unwrap_or_default()
        });
    }

    /// Install an `attr_<key>` placeholder resolving the attribute as
    /// bare scalar text.
    pub fn register_attribute(&self, cache: &Arc<PlayerCache>, key: &str) {
        let cache = Arc::clone(cache);
        let attribute = key.to_owned();
        self.register(&format!("attr_{key}"), move |player_id| {
            cache
                .get(player_id)
                .and_then(|record| record.attribute(&attribute).map(ToString::to_string))
                .unwrap_or_default()
        });
    }

    /// Resolve a placeholder for a player.
    ///
    /// Fails soft: an unregistered name or a resolver with nothing to say
    /// yields an empty string.
    pub fn resolve(&self, name: &str, player_id: PlayerId) -> String {
        let resolvers = self.read_resolvers();
        match resolvers.get(name) {
            Some(resolver) => resolver(player_id),
            None => {
                tracing::debug!(name, "Unknown placeholder");
                String::new()
            }
        }
    }

    /// Names of every registered placeholder, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_resolvers().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn read_resolvers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Resolver>> {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_resolvers(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Resolver>> {
        self.resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
