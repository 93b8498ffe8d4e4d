//! Permission lookups through a narrow capability interface.
//!
//! The host's permissions plugin is an external collaborator; the core
//! only ever asks it a boolean question. Modeling that question as a
//! trait keeps the core runnable (and testable) without any host runtime
//! attached.

use std::sync::Arc;

use playervault_types::PlayerId;

/// Capability interface implemented over the host's permissions service.
pub trait PermissionProvider: Send + Sync {
    /// Whether the player currently holds the given permission node.
    fn has_permission(&self, player_id: PlayerId, node: &str) -> bool;
}

/// A provider that grants everything. For tests and standalone runs
/// without a permissions plugin installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionProvider for AllowAll {
    fn has_permission(&self, _player_id: PlayerId, _node: &str) -> bool {
        true
    }
}

/// The pass-through the core hands to consumers.
///
/// Pure read, no caching: the provider's own answer is authoritative on
/// every call, so a revoked permission takes effect immediately.
#[derive(Clone)]
pub struct PermissionAdapter {
    provider: Arc<dyn PermissionProvider>,
}

impl PermissionAdapter {
    /// Wrap a provider.
    pub fn new(provider: Arc<dyn PermissionProvider>) -> Self {
        Self { provider }
    }

    /// Whether the player currently holds the given permission node.
    pub fn has_permission(&self, player_id: PlayerId, node: &str) -> bool {
        let granted = self.provider.has_permission(player_id, node);
        tracing::trace!(%player_id, node, granted, "Permission lookup");
        granted
    }
}
