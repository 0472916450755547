//! Broker facade: the one shared structure every session talks to.
//!
//! Owns the subscription registry, the client registry and the session id
//! allocator.  Sessions reach shared state only through the methods here.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use lanmq_core::protocol::{encode_packet, Packet, PublishPacket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::client_registry::{ClientInfo, ClientRegistry};
use crate::application::dispatcher::{fan_out, DispatchReport};
use crate::application::handle::SessionHandle;
use crate::application::subscriptions::{SubscribeOutcome, SubscriptionRegistry};
use crate::domain::{BrokerConfig, SessionId, SessionIdAllocator};

/// Shared broker state.  Wrap in an `Arc` and hand a clone to every session.
pub struct Broker {
    config: BrokerConfig,
    ids: SessionIdAllocator,
    subscriptions: SubscriptionRegistry,
    clients: Mutex<ClientRegistry>,
    shutdown: CancellationToken,
}

impl Broker {
    /// Creates a broker whose sessions are all children of `shutdown`.
    pub fn new(config: BrokerConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            ids: SessionIdAllocator::new(),
            subscriptions: SubscriptionRegistry::new(),
            clients: Mutex::new(ClientRegistry::new()),
            shutdown,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn clients(&self) -> MutexGuard<'_, ClientRegistry> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a session for a newly accepted peer and registers it.
    ///
    /// Returns the shared handle and the receiving end of its outbound queue,
    /// which the connection's writer drains.
    pub fn open_session(&self, peer_addr: SocketAddr) -> (Arc<SessionHandle>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_capacity);
        let handle = Arc::new(SessionHandle::new(
            self.ids.next(),
            peer_addr,
            tx,
            self.shutdown.child_token(),
        ));
        self.clients().register(Arc::clone(&handle));
        (handle, rx)
    }

    /// Subscribes `handle` to `topic`.
    ///
    /// Returns `false` if the session has already been torn down.
    pub fn subscribe(&self, handle: &Arc<SessionHandle>, topic: &str) -> bool {
        match self.subscriptions.subscribe(handle, topic) {
            SubscribeOutcome::Added => {
                info!(
                    session_id = %handle.id(),
                    client_id = handle.client_id().unwrap_or("-"),
                    topic,
                    "subscribed"
                );
                true
            }
            SubscribeOutcome::AlreadySubscribed => true,
            SubscribeOutcome::SessionClosed => false,
        }
    }

    /// Forwards a QoS 0 message on `topic` to every subscriber but `publisher`.
    ///
    /// The frame is encoded once and shared.  Subscribers whose writer has
    /// gone away are torn down here.  The publisher is never told about
    /// delivery failures.
    pub fn publish(&self, publisher: SessionId, topic: &str, payload: Bytes) -> DispatchReport {
        let subscribers = self.subscriptions.subscribers_for(topic);
        if subscribers.iter().all(|s| s.id() == publisher) {
            debug!(session_id = %publisher, topic, "publish with no other subscribers");
            return DispatchReport::default();
        }

        let frame = match encode_packet(&Packet::Publish(PublishPacket::at_most_once(topic, payload))) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(session_id = %publisher, topic, "cannot encode forwarded PUBLISH: {e}");
                return DispatchReport::default();
            }
        };

        let report = fan_out(&subscribers, publisher, &frame);
        for gone in &report.gone {
            self.teardown(gone);
        }
        debug!(
            session_id = %publisher,
            topic,
            matched = report.matched,
            delivered = report.delivered,
            dropped = report.dropped,
            "published"
        );
        report
    }

    /// Removes a session from both registries and cancels its connection.
    ///
    /// Runs at most once per session no matter how many paths (DISCONNECT,
    /// read error, a publisher finding the queue closed) race to call it.
    /// Returns `true` for the call that did the work.
    pub fn teardown(&self, handle: &SessionHandle) -> bool {
        if !handle.mark_closed() {
            return false;
        }
        let topics = self.subscriptions.unsubscribe_all(handle.id());
        let live = {
            let mut clients = self.clients();
            clients.remove(handle.id());
            clients.len()
        };
        handle.cancel();
        info!(
            session_id = %handle.id(),
            client_id = handle.client_id().unwrap_or("-"),
            peer = %handle.peer_addr(),
            unsubscribed = topics.len(),
            live,
            "session closed"
        );
        true
    }

    /// Lists every live session, oldest first.
    pub fn connected_clients(&self) -> Vec<ClientInfo> {
        self.clients().all()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.clients().len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions.subscriber_count(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.subscriptions.topic_count()
    }

    /// Topics a session is subscribed to.
    pub fn topics_for(&self, id: SessionId) -> Vec<String> {
        self.subscriptions.topics_for(id)
    }

    /// Signals every session and the accept loop to stop.
    ///
    /// Returns the number of sessions that were live at the time.
    pub fn broadcast_shutdown(&self) -> usize {
        self.shutdown.cancel();
        let signalled = self.clients().shutdown_all();
        info!(sessions = signalled, "shutdown broadcast");
        signalled
    }
}
