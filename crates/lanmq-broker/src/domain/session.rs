//! Session identity and lifecycle types.
//!
//! # Why a numeric id instead of a reference?
//!
//! The subscription and client registries need to name sessions they do not
//! own.  Each accepted connection gets a [`SessionId`] from a process-wide
//! [`SessionIdAllocator`].  Ids start at 1 and are never handed out twice, so
//! an entry left behind by a closed session can be recognised as stale
//! instead of silently pointing at a newer connection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Broker-internal identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing [`SessionId`]s.
///
/// Lock-free; safe to share between the accept loop and tests running in
/// parallel.
///
/// # Examples
///
/// ```rust
/// use lanmq_broker::domain::SessionIdAllocator;
///
/// let ids = SessionIdAllocator::new();
/// assert_eq!(ids.next().0, 1);
/// assert_eq!(ids.next().0, 2);
/// ```
#[derive(Debug)]
pub struct SessionIdAllocator {
    inner: AtomicU64,
}

impl SessionIdAllocator {
    /// Creates an allocator whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns a fresh id.
    ///
    /// `Relaxed` is enough: uniqueness comes from the atomic read-modify-write
    /// and ids carry no happens-before relationship.
    pub fn next(&self) -> SessionId {
        SessionId(self.inner.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a session.
///
/// ```text
/// AwaitingConnect ──CONNECT──► Connected ──DISCONNECT / error / timeout──► Closed
///        │                                                                  ▲
///        └──────────────── any other frame / error / timeout ───────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for the first frame, which must be CONNECT.
    AwaitingConnect,
    /// CONNACK sent; SUBSCRIBE, PUBLISH, PINGREQ and DISCONNECT are valid.
    Connected,
    /// Terminal.  No further frames are read or written.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitingConnect => "awaiting-connect",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_allocator_starts_at_one() {
        // Arrange
        let ids = SessionIdAllocator::new();

        // Act
        let first = ids.next();

        // Assert
        assert_eq!(first, SessionId(1));
    }

    #[test]
    fn test_allocator_is_monotonic() {
        let ids = SessionIdAllocator::new();
        let values: Vec<SessionId> = (0..100).map(|_| ids.next()).collect();
        for window in values.windows(2) {
            assert!(window[1] > window[0], "ids must be strictly increasing");
        }
        assert_eq!(ids.next(), SessionId(101));
    }

    #[test]
    fn test_allocator_never_repeats_across_threads() {
        // Arrange
        let ids = Arc::new(SessionIdAllocator::new());
        let thread_count = 8;
        let per_thread = 500;

        // Act
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..per_thread).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<SessionId> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), thread_count * per_thread);
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(42).to_string(), "#42");
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::AwaitingConnect.to_string(), "awaiting-connect");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
