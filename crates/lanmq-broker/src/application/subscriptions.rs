//! Topic → subscriber-set mapping.
//!
//! All reads and writes go through one `std::sync::Mutex` around the two
//! maps.  The lock is only ever held for map operations: callers get owned
//! snapshots back and do their socket work after the guard is dropped, so a
//! stalled subscriber can never block an unrelated SUBSCRIBE or PUBLISH.
//!
//! Topics are compared as exact, case-sensitive strings.  `+` and `#` are
//! ordinary characters.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::application::handle::SessionHandle;
use crate::domain::SessionId;

/// Result of [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Added,
    AlreadySubscribed,
    /// The session was torn down before the subscription could be recorded.
    SessionClosed,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, HashMap<SessionId, Arc<SessionHandle>>>,
    /// Reverse index so teardown does not have to scan every topic.
    by_session: HashMap<SessionId, HashSet<String>>,
}

/// Shared registry of which sessions want which topics.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves both maps consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `handle` to `topic`'s subscriber set.  Idempotent.
    ///
    /// The closed flag is checked under the lock: teardown sets it before
    /// purging, so a subscribe racing with teardown either lands before the
    /// purge (and is removed by it) or sees the flag and is refused.
    pub fn subscribe(&self, handle: &Arc<SessionHandle>, topic: &str) -> SubscribeOutcome {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if handle.is_closed() {
            return SubscribeOutcome::SessionClosed;
        }

        let id = handle.id();
        let subscribers = inner.topics.entry(topic.to_string()).or_default();
        if subscribers.insert(id, Arc::clone(handle)).is_some() {
            return SubscribeOutcome::AlreadySubscribed;
        }
        inner
            .by_session
            .entry(id)
            .or_default()
            .insert(topic.to_string());
        SubscribeOutcome::Added
    }

    /// Removes `id` from every topic it subscribed to and returns those topics.
    ///
    /// Topics left with no subscribers are dropped from the map.
    pub fn unsubscribe_all(&self, id: SessionId) -> Vec<String> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(topics) = inner.by_session.remove(&id) else {
            return Vec::new();
        };

        for topic in &topics {
            if let Some(subscribers) = inner.topics.get_mut(topic) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    inner.topics.remove(topic);
                }
            }
        }
        let mut topics: Vec<String> = topics.into_iter().collect();
        topics.sort_unstable();
        topics
    }

    /// Point-in-time snapshot of the sessions subscribed to exactly `topic`.
    pub fn subscribers_for(&self, topic: &str) -> Vec<Arc<SessionHandle>> {
        self.lock()
            .topics
            .get(topic)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Topics `id` is currently subscribed to, sorted.
    pub fn topics_for(&self, id: SessionId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .lock()
            .by_session
            .get(&id)
            .map(|topics| topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort_unstable();
        topics
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, HashMap::len)
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.lock().topics.len()
    }
}
