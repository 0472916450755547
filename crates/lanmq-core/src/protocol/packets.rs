//! MQTT 3.1.1 packet types understood by the lanmq broker.
//!
//! Only the subset needed for QoS 0 publish/subscribe is modelled:
//! CONNECT, CONNACK, PUBLISH, SUBSCRIBE, SUBACK, PINGREQ, PINGRESP and
//! DISCONNECT.  Strings on the wire are length-prefixed (2-byte big-endian
//! length followed by UTF-8 bytes).

use bytes::Bytes;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol name sent by MQTT 3.1.1 clients in CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level byte for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// Largest value the 4-byte remaining-length encoding can represent.
pub const MAX_ENCODABLE_REMAINING_LENGTH: usize = 268_435_455;

/// Default ceiling on the declared remaining length of an inbound frame.
///
/// Frames declaring more than this are rejected before their payload is
/// buffered, which bounds the memory a single connection can pin.
pub const DEFAULT_MAX_REMAINING_LENGTH: usize = 256 * 1024;

/// Required fixed-header flags for SUBSCRIBE (bit 1 set, all others clear).
pub const SUBSCRIBE_FLAGS: u8 = 0b0010;

// ── Packet type codes ─────────────────────────────────────────────────────────

/// Control packet type, carried in the high nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Upper-case MQTT name, used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::ConnAck => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::PubAck => "PUBACK",
            PacketType::PubRec => "PUBREC",
            PacketType::PubRel => "PUBREL",
            PacketType::PubComp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::SubAck => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::UnsubAck => "UNSUBACK",
            PacketType::PingReq => "PINGREQ",
            PacketType::PingResp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
        }
    }

    /// Whether this broker decodes and handles packets of this type.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            PacketType::Connect
                | PacketType::ConnAck
                | PacketType::Publish
                | PacketType::Subscribe
                | PacketType::SubAck
                | PacketType::PingReq
                | PacketType::PingResp
                | PacketType::Disconnect
        )
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Fixed header ──────────────────────────────────────────────────────────────

/// Decoded fixed header: type nibble, flags nibble, and remaining length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// Identifies the packet body that follows.
    pub packet_type: PacketType,
    /// Low nibble of the first byte.  Only PUBLISH gives it meaning.
    pub flags: u8,
    /// Byte length of everything after the fixed header.
    pub remaining_length: usize,
}

// ── Quality of service ────────────────────────────────────────────────────────

/// Delivery guarantee level.  The broker only ever grants and forwards [`QoS::AtMostOnce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(()),
        }
    }
}

// ── CONNECT ───────────────────────────────────────────────────────────────────

/// Bit flags from the CONNECT variable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectFlags(pub u8);

impl ConnectFlags {
    pub const RESERVED: u8 = 1 << 0;
    pub const CLEAN_SESSION: u8 = 1 << 1;
    pub const WILL: u8 = 1 << 2;
    pub const WILL_QOS_MASK: u8 = 0b0001_1000;
    pub const WILL_RETAIN: u8 = 1 << 5;
    pub const PASSWORD: u8 = 1 << 6;
    pub const USERNAME: u8 = 1 << 7;

    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn clean_session(self) -> bool {
        self.has(Self::CLEAN_SESSION)
    }

    pub fn will(self) -> bool {
        self.has(Self::WILL)
    }

    pub fn username(self) -> bool {
        self.has(Self::USERNAME)
    }

    pub fn password(self) -> bool {
        self.has(Self::PASSWORD)
    }
}

/// Last-will message announced in CONNECT.  Decoded so the frame is consumed
/// correctly; the broker never publishes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Bytes,
}

/// CONNECT (1): first frame a client sends on a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    /// `"MQTT"` for 3.1.1 clients, `"MQIsdp"` for 3.1 clients.
    pub protocol_name: String,
    /// `4` for 3.1.1, `3` for 3.1.
    pub protocol_level: u8,
    pub flags: ConnectFlags,
    /// Keep-alive interval in seconds; `0` disables the client-side timer.
    pub keep_alive: u16,
    /// May be empty, in which case the broker assigns one.
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl ConnectPacket {
    /// A minimal 3.1.1 CONNECT with a clean session and no optional fields.
    pub fn new(client_id: impl Into<String>, keep_alive: u16) -> Self {
        Self {
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_level: PROTOCOL_LEVEL,
            flags: ConnectFlags(ConnectFlags::CLEAN_SESSION),
            keep_alive,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }
}

// ── CONNACK ───────────────────────────────────────────────────────────────────

/// CONNACK return codes (MQTT 3.1.1 §3.2.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0x00,
    UnacceptableProtocolVersion = 0x01,
    IdentifierRejected = 0x02,
    ServerUnavailable = 0x03,
    BadUsernameOrPassword = 0x04,
    NotAuthorized = 0x05,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(ConnectReturnCode::Accepted),
            0x01 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            0x02 => Ok(ConnectReturnCode::IdentifierRejected),
            0x03 => Ok(ConnectReturnCode::ServerUnavailable),
            0x04 => Ok(ConnectReturnCode::BadUsernameOrPassword),
            0x05 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(()),
        }
    }
}

/// CONNACK (2): broker reply to CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    /// Always `false` here: sessions are never persisted.
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    pub fn accepted() -> Self {
        Self {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        }
    }
}

// ── PUBLISH ───────────────────────────────────────────────────────────────────

/// PUBLISH (3): an application message for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic: String,
    /// Raw message bytes: the remainder of the frame after the variable header.
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present only when `qos` is above [`QoS::AtMostOnce`].
    pub packet_id: Option<u16>,
}

impl PublishPacket {
    /// A QoS 0 publish with DUP and RETAIN clear, the only form the broker forwards.
    pub fn at_most_once(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        }
    }
}

// ── SUBSCRIBE / SUBACK ────────────────────────────────────────────────────────

/// One (topic filter, requested QoS) pair from a SUBSCRIBE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    /// Matched as an exact, case-sensitive string.  `+` and `#` have no special meaning.
    pub topic: String,
    pub requested_qos: QoS,
}

/// SUBSCRIBE (8): registers interest in one or more topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    /// Never empty on the wire.
    pub filters: Vec<TopicFilter>,
}

impl SubscribePacket {
    /// The usual single-topic, QoS 0 request.
    pub fn single(packet_id: u16, topic: impl Into<String>) -> Self {
        Self {
            packet_id,
            filters: vec![TopicFilter {
                topic: topic.into(),
                requested_qos: QoS::AtMostOnce,
            }],
        }
    }
}

/// Per-filter outcome in a SUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    Granted(QoS),
    Failure,
}

impl SubscribeReturnCode {
    pub const FAILURE_BYTE: u8 = 0x80;

    pub fn to_byte(self) -> u8 {
        match self {
            SubscribeReturnCode::Granted(qos) => qos as u8,
            SubscribeReturnCode::Failure => Self::FAILURE_BYTE,
        }
    }
}

impl TryFrom<u8> for SubscribeReturnCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        if value == Self::FAILURE_BYTE {
            return Ok(SubscribeReturnCode::Failure);
        }
        QoS::try_from(value).map(SubscribeReturnCode::Granted)
    }
}

/// SUBACK (9): reply to SUBSCRIBE, echoing its packet id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    /// One entry per filter of the acknowledged SUBSCRIBE, in the same order.
    pub return_codes: Vec<SubscribeReturnCode>,
}

// ── Top-level enum ────────────────────────────────────────────────────────────

/// A decoded control packet.  Constructed per frame and consumed immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Returns the [`PacketType`] for this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Fixed-header flags nibble this packet is encoded with.
    pub fn header_flags(&self) -> u8 {
        match self {
            Packet::Publish(p) => {
                let mut flags = (p.qos as u8) << 1;
                if p.dup {
                    flags |= 0b1000;
                }
                if p.retain {
                    flags |= 0b0001;
                }
                flags
            }
            Packet::Subscribe(_) => SUBSCRIBE_FLAGS,
            _ => 0,
        }
    }
}
