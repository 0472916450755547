//! Shared, cloneable face of a session.
//!
//! A [`Session`](crate::application::session::Session) is owned by its
//! connection task.  Everything else (the registries, the dispatcher, other
//! sessions publishing to it) only ever sees an `Arc<SessionHandle>`: enough
//! to enqueue a frame or request teardown, never enough to read from the
//! socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::domain::SessionId;

/// Outcome of a non-blocking [`SessionHandle::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame is in the session's outbound queue.
    Queued,
    /// The queue was full; the frame was discarded.
    Dropped,
    /// The session is closed or its writer has gone away.
    Gone,
}

/// Reference to a live session held by registries and publishers.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    peer_addr: SocketAddr,
    accepted_at: SystemTime,
    client_id: OnceLock<String>,
    outbound: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer_addr,
            accepted_at: SystemTime::now(),
            client_id: OnceLock::new(),
            outbound,
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn accepted_at(&self) -> SystemTime {
        self.accepted_at
    }

    /// Client identifier from CONNECT, once the handshake has completed.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.get().map(String::as_str)
    }

    /// Records the client identifier.  Returns `false` if one was already set.
    pub fn set_client_id(&self, client_id: String) -> bool {
        self.client_id.set(client_id).is_ok()
    }

    /// Enqueues `frame` without waiting.
    ///
    /// Used by fan-out: a slow subscriber loses the message instead of
    /// stalling the publisher.
    pub fn deliver(&self, frame: Bytes) -> Delivery {
        if self.is_closed() {
            return Delivery::Gone;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Enqueues a reply to this session's own client, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns the frame back if the writer has shut down.
    pub async fn send(&self, frame: Bytes) -> Result<(), Bytes> {
        self.outbound.send(frame).await.map_err(|e| e.0)
    }

    /// Flags the session as closed.
    ///
    /// Returns `true` only for the first caller, which then owns teardown.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when this session must stop reading.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Asks the connection task to stop after its current blocking call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
