//! Client registry: bookkeeping of every live session.
//!
//! Each accepted connection is registered here until teardown.  The registry
//! answers "who is connected?" for diagnostics and lets shutdown reach every
//! session.  It plays no part in routing: publishes only ever consult the
//! subscription registry.
//!
//! # Connection lifecycle
//!
//! ```text
//! accept ──► register ──► (AwaitingConnect ──► Connected) ──► teardown ──► remove
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use crate::application::handle::SessionHandle;
use crate::domain::SessionId;

/// Snapshot of one live session, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub session_id: SessionId,
    /// `None` until the session's CONNECT has been processed.
    pub client_id: Option<String>,
    pub peer_addr: SocketAddr,
    pub connected_at: SystemTime,
}

impl ClientInfo {
    fn from_handle(handle: &SessionHandle) -> Self {
        Self {
            session_id: handle.id(),
            client_id: handle.client_id().map(str::to_string),
            peer_addr: handle.peer_addr(),
            connected_at: handle.accepted_at(),
        }
    }
}

/// In-memory registry of all live sessions.
///
/// Stored behind a `Mutex` in the [`Broker`](crate::application::Broker) so
/// it can be shared between connection tasks.
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<SessionId, Arc<SessionHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted session.
    pub fn register(&mut self, handle: Arc<SessionHandle>) {
        self.clients.insert(handle.id(), handle);
    }

    /// Removes a session.  Returns its handle if it was registered.
    pub fn remove(&mut self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.clients.remove(&id)
    }

    /// Returns the handle for a specific session.
    pub fn get(&self, id: SessionId) -> Option<&Arc<SessionHandle>> {
        self.clients.get(&id)
    }

    /// Returns a snapshot of all sessions, oldest first.
    pub fn all(&self) -> Vec<ClientInfo> {
        let mut all: Vec<ClientInfo> = self
            .clients
            .values()
            .map(|h| ClientInfo::from_handle(h))
            .collect();
        all.sort_by_key(|c| c.session_id);
        all
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Asks every registered session to stop.  Returns how many were signalled.
    ///
    /// Sessions remove themselves as they finish tearing down.
    pub fn shutdown_all(&self) -> usize {
        for handle in self.clients.values() {
            handle.cancel();
        }
        self.clients.len()
    }
}
