//! Registry of live connections, at most one per node id.

use super::connection::Connection;
use crate::types::{ConnectionId, NodeId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<NodeId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live connection for `id`. A closed entry is evicted on the way.
    pub fn get(&self, id: &NodeId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock();
        match connections.get(id) {
            Some(conn) if !conn.is_closed() => Some(Arc::clone(conn)),
            Some(_) => {
                connections.remove(id);
                None
            }
            None => None,
        }
    }

    /// Registers `conn` under its remote id.
    ///
    /// Returns the connection it superseded, if any, so the caller can close it.
    pub fn insert(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let id = conn.remote().clone();
        let previous = self.connections.lock().insert(id, Arc::clone(&conn));
        previous.filter(|old| old.id() != conn.id())
    }

    /// Removes the entry for `id` only if it still holds connection `conn_id`.
    pub fn remove_if_current(&self, id: &NodeId, conn_id: ConnectionId) -> bool {
        let mut connections = self.connections.lock();
        if connections.get(id).map(|conn| conn.id()) == Some(conn_id) {
            connections.remove(id);
            true
        } else {
            false
        }
    }

    /// Empties the registry, handing back everything that was in it.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().drain().map(|(_, conn)| conn).collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.connections.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
