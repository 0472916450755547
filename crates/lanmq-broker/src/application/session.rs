//! Per-connection session state machine.
//!
//! A [`Session`] is driven by its connection task: every decoded packet is
//! passed to [`Session::handle_packet`], which applies it to the broker and
//! queues any reply.  The session itself never touches the socket.
//!
//! ```text
//! AwaitingConnect ──CONNECT──► Connected ──DISCONNECT──► Closed
//! ```
//!
//! Any other frame before CONNECT, a second CONNECT, or a packet type only
//! the broker may send is a protocol violation: the caller closes the
//! connection and calls [`Session::close`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lanmq_core::protocol::{
    encode_packet, ConnAckPacket, ConnectPacket, Packet, PacketType, ProtocolError,
    PublishPacket, QoS, SubAckPacket, SubscribePacket, SubscribeReturnCode,
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::broker::Broker;
use crate::application::handle::SessionHandle;
use crate::domain::{BrokerConfig, SessionState};

/// Prefix of client identifiers the broker assigns to clients that sent none.
pub const ASSIGNED_CLIENT_ID_PREFIX: &str = "auto-";

/// What the connection loop should do after a packet was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    /// Keep reading.
    Continue,
    /// The client sent DISCONNECT; close without writing anything further.
    Disconnect,
}

/// Reasons a session must be closed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("expected CONNECT as first packet, got {0}")]
    ExpectedConnect(PacketType),

    #[error("second CONNECT on an established session")]
    DuplicateConnect,

    #[error("{0} may only be sent by the broker")]
    UnexpectedPacket(PacketType),

    #[error("PUBLISH at {0:?} is not supported")]
    UnsupportedQoS(QoS),

    #[error("session is already closed")]
    Closed,

    #[error("outbound queue closed")]
    OutboundClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// `true` for errors caused by the peer breaking the protocol, as opposed
    /// to the connection itself going away.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, SessionError::Closed | SessionError::OutboundClosed)
    }
}

/// Broker-side state of one connection.
pub struct Session {
    broker: Arc<Broker>,
    handle: Arc<SessionHandle>,
    state: SessionState,
    keep_alive: u16,
    last_activity: Instant,
}

impl Session {
    /// Creates a session in [`SessionState::AwaitingConnect`].
    pub fn new(broker: Arc<Broker>, handle: Arc<SessionHandle>) -> Self {
        Self {
            broker,
            handle,
            state: SessionState::AwaitingConnect,
            keep_alive: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &BrokerConfig {
        self.broker.config()
    }

    /// Keep-alive announced in CONNECT, in seconds.
    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    /// Topics this session is subscribed to, as recorded by the registry.
    pub fn topics(&self) -> Vec<String> {
        self.broker.topics_for(self.handle.id())
    }

    /// Records that bytes were received from the peer.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Silence allowed before the session is considered dead.
    pub fn idle_timeout(&self) -> Duration {
        match self.state {
            SessionState::Connected => self.config().idle_timeout_for(self.keep_alive),
            _ => self.config().idle_timeout,
        }
    }

    /// Instant at which the session times out unless more bytes arrive.
    pub fn idle_deadline(&self) -> Instant {
        self.last_activity + self.idle_timeout()
    }

    /// Applies one decoded packet.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the packet is not valid in the current
    /// state or the reply could not be queued.  The session must then be
    /// closed.
    pub async fn handle_packet(&mut self, packet: Packet) -> Result<SessionFlow, SessionError> {
        debug!(
            session_id = %self.handle.id(),
            state = %self.state,
            packet = %packet.packet_type(),
            "packet received"
        );

        match (self.state, packet) {
            (SessionState::Closed, _) => Err(SessionError::Closed),
            (SessionState::AwaitingConnect, Packet::Connect(connect)) => {
                self.on_connect(connect).await
            }
            (SessionState::AwaitingConnect, other) => {
                Err(SessionError::ExpectedConnect(other.packet_type()))
            }
            (SessionState::Connected, Packet::Connect(_)) => Err(SessionError::DuplicateConnect),
            (SessionState::Connected, Packet::Subscribe(subscribe)) => {
                self.on_subscribe(subscribe).await
            }
            (SessionState::Connected, Packet::Publish(publish)) => self.on_publish(publish),
            (SessionState::Connected, Packet::PingReq) => {
                self.reply(&Packet::PingResp).await?;
                Ok(SessionFlow::Continue)
            }
            (SessionState::Connected, Packet::Disconnect) => Ok(SessionFlow::Disconnect),
            (SessionState::Connected, other) => {
                Err(SessionError::UnexpectedPacket(other.packet_type()))
            }
        }
    }

    /// Moves to [`SessionState::Closed`] and purges the session from the broker.
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.broker.teardown(&self.handle);
    }

    // ── Packet handlers ──────────────────────────────────────────────────────

    async fn on_connect(&mut self, connect: ConnectPacket) -> Result<SessionFlow, SessionError> {
        let client_id = if connect.client_id.is_empty() {
            format!("{ASSIGNED_CLIENT_ID_PREFIX}{}", Uuid::new_v4().simple())
        } else {
            connect.client_id
        };
        self.handle.set_client_id(client_id.clone());
        self.keep_alive = connect.keep_alive;
        self.state = SessionState::Connected;

        info!(
            session_id = %self.handle.id(),
            client_id = %client_id,
            peer = %self.handle.peer_addr(),
            protocol = %connect.protocol_name,
            level = connect.protocol_level,
            keep_alive = connect.keep_alive,
            "client connected"
        );

        self.reply(&Packet::ConnAck(ConnAckPacket::accepted())).await?;
        Ok(SessionFlow::Continue)
    }

    async fn on_subscribe(&mut self, subscribe: SubscribePacket) -> Result<SessionFlow, SessionError> {
        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        for filter in &subscribe.filters {
            if !self.broker.subscribe(&self.handle, &filter.topic) {
                return Err(SessionError::Closed);
            }
            // Only at-most-once delivery exists, whatever was requested.
            return_codes.push(SubscribeReturnCode::Granted(QoS::AtMostOnce));
        }

        self.reply(&Packet::SubAck(SubAckPacket {
            packet_id: subscribe.packet_id,
            return_codes,
        }))
        .await?;
        Ok(SessionFlow::Continue)
    }

    fn on_publish(&mut self, publish: PublishPacket) -> Result<SessionFlow, SessionError> {
        if publish.qos != QoS::AtMostOnce {
            return Err(SessionError::UnsupportedQoS(publish.qos));
        }
        self.broker
            .publish(self.handle.id(), &publish.topic, publish.payload);
        Ok(SessionFlow::Continue)
    }

    async fn reply(&self, packet: &Packet) -> Result<(), SessionError> {
        let frame = Bytes::from(encode_packet(packet)?);
        self.handle
            .send(frame)
            .await
            .map_err(|_| SessionError::OutboundClosed)
    }
}
