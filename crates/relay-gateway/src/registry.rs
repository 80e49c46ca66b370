//! Identity registry
//!
//! Maps a user identity to the connection currently representing it.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::connection::ConnectionHandle;

/// Identity to live connection mapping.
///
/// At most one handle per identity; registering again overwrites the
/// previous handle without closing it.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `identity` to `handle`, replacing any existing mapping
    pub fn register(&self, identity: impl Into<String>, handle: ConnectionHandle) {
        let identity = identity.into();
        if let Some(previous) = self.entries.insert(identity.clone(), handle) {
            debug!(
                identity = %identity,
                previous = %previous.id,
                "Identity taken over by a newer connection"
            );
        }
    }

    /// Current handle for `identity`, if any
    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    /// Drop the mapping for `identity`; no-op if absent
    pub fn remove(&self, identity: &str) -> Option<ConnectionHandle> {
        self.entries.remove(identity).map(|(_, handle)| handle)
    }

    /// Drop the mapping only while it still points at `connection_id`.
    ///
    /// Returns false when the identity is absent or owned by another
    /// connection.
    pub fn remove_if_current(&self, identity: &str, connection_id: &str) -> bool {
        self.entries
            .remove_if(identity, |_, handle| handle.id == connection_id)
            .is_some()
    }

    /// Check if an identity is mapped
    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// Number of mapped identities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All mapped identities, unordered
    pub fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}
