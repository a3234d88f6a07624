//! Connection Registry
//!
//! The set of live connections that broadcasts are delivered to. Membership is
//! copy-on-write: a [`Snapshot`] shares the current map, and a mutation only
//! copies the map while snapshots of it are still alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::{Connection, ConnectionId};
use crate::error::RelayError;

type Members = HashMap<ConnectionId, Arc<Connection>>;

/// Concurrency-safe set of live connections keyed by identity
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: RwLock<Arc<Members>>,
    total_registered: AtomicU64,
}

/// Immutable point-in-time view of registry membership
#[derive(Debug, Clone)]
pub struct Snapshot {
    members: Arc<Members>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Fails if its identity is already present.
    pub async fn add(&self, connection: Arc<Connection>) -> Result<(), RelayError> {
        let id = connection.id();
        let mut guard = self.members.write().await;

        if guard.contains_key(&id) {
            return Err(RelayError::AlreadyRegistered(id));
        }

        Arc::make_mut(&mut *guard).insert(id, connection);
        self.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = %id, members = guard.len(), "Registered connection");
        Ok(())
    }

    /// Unregister a connection. Returns whether it was present; removing an
    /// absent connection is a no-op.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let mut guard = self.members.write().await;

        if !guard.contains_key(&id) {
            return false;
        }

        Arc::make_mut(&mut *guard).remove(&id);
        debug!(connection_id = %id, members = guard.len(), "Unregistered connection");
        true
    }

    /// Share the current membership without copying it
    pub async fn snapshot(&self) -> Snapshot {
        let guard = self.members.read().await;
        Snapshot {
            members: Arc::clone(&*guard),
        }
    }

    /// Whether `id` is currently registered
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().await.contains_key(&id)
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Whether no connection is registered
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Number of successful registrations since creation
    pub fn total_registered(&self) -> u64 {
        self.total_registered.load(Ordering::Relaxed)
    }
}

impl Snapshot {
    /// Number of members in this view
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether this view has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `id` was a member when the snapshot was taken
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    /// Members in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.members.values()
    }

    /// Member ids in ascending order
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.members.keys().copied().collect();
        ids.sort();
        ids
    }
}
