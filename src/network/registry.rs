//! Connection Registry
//!
//! The set of peers a node can send to.
//!
//! ## Concurrency
//! - Every operation (add, remove, iterate) takes the same `parking_lot::Mutex`
//! - `for_each` holds the lock for the whole iteration, so the callback must
//!   NOT call back into the same peer set (the mutex is not reentrant)
//! - Send failures inside `for_each` never remove the peer; the peer's own
//!   reader loop removes it on its next failed read

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Connection, ConnectionId};

/// Sendable targets of a chat node
pub trait PeerSet: Send + Sync {
    /// Register a connection; returns `false` if it was refused
    fn add(&self, conn: Arc<Connection>) -> bool;

    /// Remove by identity; `None` if it was not a member
    fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>>;

    /// Visit every member under the lock
    fn for_each(&self, f: &mut dyn FnMut(&Arc<Connection>));

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current members, in order
    fn snapshot(&self) -> Vec<Arc<Connection>> {
        let mut members = Vec::with_capacity(self.len());
        self.for_each(&mut |conn| members.push(Arc::clone(conn)));
        members
    }

    /// Drop every member and close its stream
    ///
    /// Returns how many connections were removed.
    fn close_all(&self) -> usize;
}

// =============================================================================
// Multi-peer registry (host)
// =============================================================================

/// Ordered registry of every client connected to the host
#[derive(Default)]
pub struct ConnectionRegistry {
    /// Insertion order preserved
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().iter().any(|c| c.id() == id)
    }

    /// Member ids in insertion order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().iter().map(|c| c.id()).collect()
    }
}

impl PeerSet for ConnectionRegistry {
    fn add(&self, conn: Arc<Connection>) -> bool {
        let mut connections = self.connections.lock();
        if connections.iter().any(|c| c.id() == conn.id()) {
            tracing::debug!("Connection {} already registered", conn.id());
            return false;
        }
        connections.push(conn);
        true
    }

    fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock();
        let pos = connections.iter().position(|c| c.id() == id)?;
        Some(connections.remove(pos))
    }

    fn for_each(&self, f: &mut dyn FnMut(&Arc<Connection>)) {
        let connections = self.connections.lock();
        for conn in connections.iter() {
            f(conn);
        }
    }

    fn len(&self) -> usize {
        self.connections.lock().len()
    }

    fn close_all(&self) -> usize {
        let drained: Vec<_> = std::mem::take(&mut *self.connections.lock());
        for conn in &drained {
            conn.close();
        }
        drained.len()
    }
}

// =============================================================================
// Single upstream connection (client)
// =============================================================================

/// The one host a client is joined to, if any
#[derive(Default)]
pub struct UpstreamSlot {
    connection: Mutex<Option<Arc<Connection>>>,
}

impl UpstreamSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current upstream connection
    pub fn get(&self) -> Option<Arc<Connection>> {
        self.connection.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }
}

impl PeerSet for UpstreamSlot {
    fn add(&self, conn: Arc<Connection>) -> bool {
        let mut slot = self.connection.lock();
        if let Some(existing) = slot.as_ref() {
            tracing::warn!(
                "Refusing upstream {}: already joined to {}",
                conn.peer_addr(),
                existing.peer_addr()
            );
            return false;
        }
        *slot = Some(conn);
        true
    }

    fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut slot = self.connection.lock();
        match slot.as_ref() {
            Some(conn) if conn.id() == id => slot.take(),
            _ => None,
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(&Arc<Connection>)) {
        let slot = self.connection.lock();
        if let Some(conn) = slot.as_ref() {
            f(conn);
        }
    }

    fn len(&self) -> usize {
        usize::from(self.connection.lock().is_some())
    }

    fn close_all(&self) -> usize {
        match self.connection.lock().take() {
            Some(conn) => {
                conn.close();
                1
            }
            None => 0,
        }
    }
}
