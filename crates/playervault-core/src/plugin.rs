//! The plugin facade: explicit enable and teardown for everything the
//! core owns.
//!
//! The cache, coordinator, pool, and adapters are plain values with
//! defined construction order, not ambient globals. The host shell calls
//! [`PlayerVault::enable`] once at plugin startup and
//! [`PlayerVault::disable`] once at shutdown; in between it reads through
//! the accessors.

use std::sync::Arc;

use playervault_db::{DbPool, PgRecordStore, StoreError};

use crate::cache::{FlushReport, PlayerCache};
use crate::config::PluginConfig;
use crate::lifecycle::{HostHandle, LifecycleCoordinator};
use crate::permissions::{PermissionAdapter, PermissionProvider};
use crate::placeholders::PlaceholderRegistry;

/// Errors that can abort plugin enable.
#[derive(Debug, thiserror::Error)]
pub enum EnableError {
    /// The pool could not be established or migrations failed. An
    /// unreachable database fails enable rather than limping along.
    #[error("storage startup failed: {0}")]
    Store(#[from] StoreError),
}

/// The enabled plugin core.
///
/// Owns the connection pool, the player cache, the lifecycle
/// coordinator, and the integration adapters.
pub struct PlayerVault {
    pool: DbPool,
    cache: Arc<PlayerCache>,
    coordinator: LifecycleCoordinator,
    host: HostHandle,
    permissions: PermissionAdapter,
    placeholders: Arc<PlaceholderRegistry>,
}

impl PlayerVault {
    /// Bring the core up: connect the pool, run migrations, build the
    /// cache, spawn the coordinator, and install the default
    /// placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`EnableError::Store`] if the database is unreachable or
    /// migrations fail; the plugin shell should report the failure and
    /// stay disabled.
    pub async fn enable(
        config: PluginConfig,
        provider: Arc<dyn PermissionProvider>,
    ) -> Result<Self, EnableError> {
        let pool = DbPool::connect(&config.database.to_db_config()).await?;
        pool.run_migrations().await?;

        let store = Arc::new(PgRecordStore::new(pool.clone()));
        let cache = Arc::new(PlayerCache::new(
            store,
            config.cache.clone(),
            config.defaults.attributes,
        ));
        let (coordinator, host) = LifecycleCoordinator::spawn(Arc::clone(&cache), &config.cache);

        let placeholders = Arc::new(PlaceholderRegistry::new());
        placeholders.register_defaults(&cache);

        tracing::info!("PlayerVault enabled");
        Ok(Self {
            pool,
            cache,
            coordinator,
            host,
            permissions: PermissionAdapter::new(provider),
            placeholders,
        })
    }

    /// The player cache, for in-game logic.
    pub fn cache(&self) -> &Arc<PlayerCache> {
        &self.cache
    }

    /// The handle the host adapter delivers join/leave signals through.
    pub fn host_handle(&self) -> HostHandle {
        self.host.clone()
    }

    /// The permission adapter.
    pub const fn permissions(&self) -> &PermissionAdapter {
        &self.permissions
    }

    /// The placeholder registry, for installing additional resolvers.
    pub fn placeholders(&self) -> &Arc<PlaceholderRegistry> {
        &self.placeholders
    }

    /// Whether the database answers a round trip right now.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`StoreError`] when it does not.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.pool.health_check().await
    }

    /// Tear the core down: stop the coordinator (final flush, eviction)
    /// and close the pool. Returns the final flush tally.
    pub async fn disable(self) -> FlushReport {
        let report = self.coordinator.shutdown().await;
        self.pool.close().await;
        tracing::info!("PlayerVault disabled");
        report
    }
}
