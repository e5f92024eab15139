//! Registered connections and the last broadcast, behind one lock.
//!
//! The lock is a plain `parking_lot::Mutex` and is never held across an
//! `.await`: callers copy out what they need (a snapshot of connections, the
//! cached frame) and do socket I/O after releasing it.

use crate::connection::{Connection, ConnectionId};
use crate::envelope::Envelope;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct CachedBroadcast {
    envelope: Envelope,
    frame: Bytes,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    last_broadcast: Option<CachedBroadcast>,
}

/// Connection table plus the single cached "last broadcast".
#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and return the cached broadcast frame to replay to it.
    ///
    /// Both happen under one lock acquisition, so a broadcast racing with
    /// this call either lands in the returned frame or sees the new
    /// connection in its snapshot, never neither.
    pub fn register(&self, connection: Arc<Connection>) -> Option<Bytes> {
        let mut state = self.state.lock();
        let id = connection.id();
        if state.connections.insert(id, connection).is_some() {
            tracing::warn!(connection_id = %id, "replaced a connection registered under the same id");
        }
        state.last_broadcast.as_ref().map(|cached| cached.frame.clone())
    }

    /// Remove a connection. Returns it if it was still registered.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.state.lock().connections.remove(&id)
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.lock().connections.contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the cached broadcast and return the connections to deliver it to.
    pub fn cache_and_snapshot(&self, envelope: Envelope, frame: Bytes) -> Vec<Arc<Connection>> {
        let mut state = self.state.lock();
        state.last_broadcast = Some(CachedBroadcast { envelope, frame });
        state.connections.values().cloned().collect()
    }

    /// The most recently broadcast envelope, if any.
    pub fn last_broadcast(&self) -> Option<Envelope> {
        self.state
            .lock()
            .last_broadcast
            .as_ref()
            .map(|cached| cached.envelope.clone())
    }

    /// Remove and return every registered connection.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.state
            .lock()
            .connections
            .drain()
            .map(|(_, connection)| connection)
            .collect()
    }
}
