//! Binary codec for MQTT 3.1.1 control packets.
//!
//! Wire format:
//! ```text
//! [type:4 | flags:4][remaining_length:1..4][variable header + payload:remaining_length]
//! ```
//! Multi-byte integers are big-endian.  Strings carry a 2-byte length prefix.
//!
//! Decoding works on an accumulating receive buffer: if the buffer does not
//! yet hold a whole frame, [`ProtocolError::InsufficientData`] is returned and
//! nothing is consumed, so the caller reads more bytes and retries.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::packets::{
    ConnAckPacket, ConnectFlags, ConnectPacket, ConnectReturnCode, FixedHeader, Packet,
    PacketType, PublishPacket, QoS, SubAckPacket, SubscribePacket, SubscribeReturnCode,
    TopicFilter, Will, DEFAULT_MAX_REMAINING_LENGTH, SUBSCRIBE_FLAGS,
};
use crate::protocol::remaining_length::{
    decode_remaining_length, encode_remaining_length, remaining_length_size,
};

/// Errors that can occur during packet encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The buffer does not yet hold a complete frame.  Not a violation.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The remaining-length field ran past 4 bytes.
    #[error("malformed remaining length: continuation bit set on 4th byte")]
    MalformedRemainingLength,

    /// The declared remaining length is above the configured ceiling.
    #[error("remaining length {declared} exceeds limit of {max} bytes")]
    RemainingLengthExceeded { declared: usize, max: usize },

    /// The packet type nibble is 0 or 15.
    #[error("unknown packet type: 0x{0:X}")]
    UnknownPacketType(u8),

    /// A valid MQTT packet type that this broker does not handle.
    #[error("unsupported packet type: {0}")]
    UnsupportedPacketType(PacketType),

    /// The fixed-header flags nibble is not allowed for this packet type.
    #[error("invalid flags 0b{flags:04b} for {packet_type}")]
    InvalidFlags { packet_type: PacketType, flags: u8 },

    /// The packet body could not be parsed (truncated field, bad UTF-8, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A packet is too large to be represented on the wire.
    #[error("payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// `true` when more bytes are needed; every other variant is fatal to the connection.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::InsufficientData { .. })
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into its complete wire representation.
///
/// # Errors
///
/// Returns [`ProtocolError`] if a string field is longer than 65 535 bytes,
/// a QoS > 0 publish has no packet id, or the frame is too large to encode.
///
/// # Examples
///
/// ```rust
/// use lanmq_core::protocol::{decode_packet, encode_packet, Packet};
///
/// let bytes = encode_packet(&Packet::PingResp).unwrap();
/// assert_eq!(bytes, vec![0xD0, 0x00]);
/// let (decoded, consumed) = decode_packet(&bytes).unwrap();
/// assert_eq!(decoded, Packet::PingResp);
/// assert_eq!(consumed, 2);
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let body = encode_body(packet)?;

    let mut buf = Vec::with_capacity(1 + remaining_length_size(body.len()) + body.len());
    buf.push(((packet.packet_type() as u8) << 4) | packet.header_flags());
    encode_remaining_length(body.len(), &mut buf)?;
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decodes the fixed header at the start of `bytes`.
///
/// Returns the header and its length in bytes (1 type byte plus 1–4
/// remaining-length bytes).  The body is not inspected.
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] if the header itself is truncated.
/// - [`ProtocolError::UnknownPacketType`] for type nibbles 0 and 15.
/// - [`ProtocolError::MalformedRemainingLength`] for a 5-byte length field.
/// - [`ProtocolError::RemainingLengthExceeded`] if the declared length is above `limit`.
pub fn decode_fixed_header(
    bytes: &[u8],
    limit: usize,
) -> Result<(FixedHeader, usize), ProtocolError> {
    let Some(&first) = bytes.first() else {
        return Err(ProtocolError::InsufficientData {
            needed: 2,
            available: 0,
        });
    };

    let type_code = first >> 4;
    let packet_type =
        PacketType::try_from(type_code).map_err(|_| ProtocolError::UnknownPacketType(type_code))?;
    let flags = first & 0x0F;

    let (remaining_length, length_bytes) = match decode_remaining_length(&bytes[1..]) {
        Ok(decoded) => decoded,
        Err(ProtocolError::InsufficientData { needed, .. }) => {
            return Err(ProtocolError::InsufficientData {
                needed: needed + 1,
                available: bytes.len(),
            })
        }
        Err(e) => return Err(e),
    };

    if remaining_length > limit {
        return Err(ProtocolError::RemainingLengthExceeded {
            declared: remaining_length,
            max: limit,
        });
    }

    Ok((
        FixedHeader {
            packet_type,
            flags,
            remaining_length,
        },
        1 + length_bytes,
    ))
}

/// Decodes one [`Packet`] from the start of `bytes` using the default
/// 256 KiB remaining-length ceiling.
///
/// Returns the packet and the total number of bytes it occupied, so the
/// caller can advance its read cursor.
///
/// # Errors
///
/// See [`decode_packet_limited`].
pub fn decode_packet(bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    decode_packet_limited(bytes, DEFAULT_MAX_REMAINING_LENGTH)
}

/// Decodes one [`Packet`] from the start of `bytes`, rejecting frames whose
/// declared remaining length is above `limit`.
///
/// The ceiling is checked as soon as the fixed header is readable, before
/// the body has arrived.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when the frame is incomplete
/// and any other variant when the frame violates the protocol.
pub fn decode_packet_limited(
    bytes: &[u8],
    limit: usize,
) -> Result<(Packet, usize), ProtocolError> {
    let (header, header_len) = decode_fixed_header(bytes, limit)?;

    let total = header_len + header.remaining_length;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    if !header.packet_type.is_supported() {
        return Err(ProtocolError::UnsupportedPacketType(header.packet_type));
    }
    validate_flags(header.packet_type, header.flags)?;

    let body = &bytes[header_len..total];
    let packet = decode_body(header, body)?;
    Ok((packet, total))
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn validate_flags(packet_type: PacketType, flags: u8) -> Result<(), ProtocolError> {
    let valid = match packet_type {
        PacketType::Publish => (flags >> 1) & 0b11 != 0b11,
        PacketType::Subscribe => flags == SUBSCRIBE_FLAGS,
        _ => flags == 0,
    };
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidFlags { packet_type, flags })
    }
}

fn encode_body(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match packet {
        Packet::Connect(m) => encode_connect(&mut buf, m)?,
        Packet::ConnAck(m) => {
            buf.push(u8::from(m.session_present));
            buf.push(m.return_code as u8);
        }
        Packet::Publish(m) => encode_publish(&mut buf, m)?,
        Packet::Subscribe(m) => encode_subscribe(&mut buf, m)?,
        Packet::SubAck(m) => {
            buf.extend_from_slice(&m.packet_id.to_be_bytes());
            buf.extend(m.return_codes.iter().map(|rc| rc.to_byte()));
        }
        Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
    }
    Ok(buf)
}

fn decode_body(header: FixedHeader, body: &[u8]) -> Result<Packet, ProtocolError> {
    match header.packet_type {
        PacketType::Connect => Ok(Packet::Connect(decode_connect(body)?)),
        PacketType::ConnAck => Ok(Packet::ConnAck(decode_connack(body)?)),
        PacketType::Publish => Ok(Packet::Publish(decode_publish(header.flags, body)?)),
        PacketType::Subscribe => Ok(Packet::Subscribe(decode_subscribe(body)?)),
        PacketType::SubAck => Ok(Packet::SubAck(decode_suback(body)?)),
        PacketType::PingReq => require_empty(body, "PINGREQ").map(|_| Packet::PingReq),
        PacketType::PingResp => require_empty(body, "PINGRESP").map(|_| Packet::PingResp),
        PacketType::Disconnect => require_empty(body, "DISCONNECT").map(|_| Packet::Disconnect),
        other => Err(ProtocolError::UnsupportedPacketType(other)),
    }
}

// ── Per-packet encoders ───────────────────────────────────────────────────────

fn encode_connect(buf: &mut Vec<u8>, m: &ConnectPacket) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, &m.protocol_name)?;
    buf.push(m.protocol_level);

    // Derive the presence bits from the optional fields so they always agree.
    let mut flags = m.flags.0
        & !(ConnectFlags::WILL | ConnectFlags::USERNAME | ConnectFlags::PASSWORD);
    if m.will.is_some() {
        flags |= ConnectFlags::WILL;
    }
    if m.username.is_some() {
        flags |= ConnectFlags::USERNAME;
    }
    if m.password.is_some() {
        flags |= ConnectFlags::PASSWORD;
    }
    buf.push(flags);
    buf.extend_from_slice(&m.keep_alive.to_be_bytes());

    write_length_prefixed_string(buf, &m.client_id)?;
    if let Some(will) = &m.will {
        write_length_prefixed_string(buf, &will.topic)?;
        write_length_prefixed_bytes(buf, &will.message)?;
    }
    if let Some(username) = &m.username {
        write_length_prefixed_string(buf, username)?;
    }
    if let Some(password) = &m.password {
        write_length_prefixed_bytes(buf, password)?;
    }
    Ok(())
}

fn encode_publish(buf: &mut Vec<u8>, m: &PublishPacket) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, &m.topic)?;
    if m.qos != QoS::AtMostOnce {
        let packet_id = m.packet_id.ok_or_else(|| {
            ProtocolError::MalformedPayload("PUBLISH with QoS > 0 needs a packet id".into())
        })?;
        buf.extend_from_slice(&packet_id.to_be_bytes());
    }
    buf.extend_from_slice(&m.payload);
    Ok(())
}

fn encode_subscribe(buf: &mut Vec<u8>, m: &SubscribePacket) -> Result<(), ProtocolError> {
    buf.extend_from_slice(&m.packet_id.to_be_bytes());
    for filter in &m.filters {
        write_length_prefixed_string(buf, &filter.topic)?;
        buf.push(filter.requested_qos as u8);
    }
    Ok(())
}

// ── Per-packet decoders ───────────────────────────────────────────────────────

fn decode_connect(p: &[u8]) -> Result<ConnectPacket, ProtocolError> {
    let (protocol_name, off) = read_length_prefixed_string(p, 0)?;
    // level (1) + flags (1) + keep_alive (2)
    require_len(p, off + 4, "CONNECT variable header")?;
    let protocol_level = p[off];
    let flags = ConnectFlags(p[off + 1]);
    if flags.has(ConnectFlags::RESERVED) {
        return Err(ProtocolError::MalformedPayload(
            "CONNECT reserved flag bit is set".into(),
        ));
    }
    let keep_alive = u16::from_be_bytes([p[off + 2], p[off + 3]]);

    let (client_id, mut off) = read_length_prefixed_string(p, off + 4)?;

    let will = if flags.will() {
        let (topic, next) = read_length_prefixed_string(p, off)?;
        let (message, next) = read_length_prefixed_bytes(p, next)?;
        off = next;
        Some(Will { topic, message })
    } else {
        None
    };
    let username = if flags.username() {
        let (username, next) = read_length_prefixed_string(p, off)?;
        off = next;
        Some(username)
    } else {
        None
    };
    let password = if flags.password() {
        let (password, next) = read_length_prefixed_bytes(p, off)?;
        off = next;
        Some(password)
    } else {
        None
    };
    require_consumed(p, off, "CONNECT")?;

    Ok(ConnectPacket {
        protocol_name,
        protocol_level,
        flags,
        keep_alive,
        client_id,
        will,
        username,
        password,
    })
}

fn decode_connack(p: &[u8]) -> Result<ConnAckPacket, ProtocolError> {
    require_len(p, 2, "CONNACK")?;
    require_consumed(p, 2, "CONNACK")?;
    if p[0] & !0x01 != 0 {
        return Err(ProtocolError::MalformedPayload(format!(
            "CONNACK reserved ack flags set: 0x{:02X}",
            p[0]
        )));
    }
    let return_code = ConnectReturnCode::try_from(p[1]).map_err(|_| {
        ProtocolError::MalformedPayload(format!("unknown CONNACK return code: {}", p[1]))
    })?;
    Ok(ConnAckPacket {
        session_present: p[0] & 0x01 != 0,
        return_code,
    })
}

fn decode_publish(flags: u8, p: &[u8]) -> Result<PublishPacket, ProtocolError> {
    let qos = QoS::try_from((flags >> 1) & 0b11).map_err(|_| ProtocolError::InvalidFlags {
        packet_type: PacketType::Publish,
        flags,
    })?;
    let (topic, mut off) = read_length_prefixed_string(p, 0)?;
    require_topic(&topic, "PUBLISH")?;

    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        require_len(p, off + 2, "PUBLISH packet id")?;
        let id = u16::from_be_bytes([p[off], p[off + 1]]);
        off += 2;
        Some(id)
    };

    Ok(PublishPacket {
        topic,
        payload: Bytes::copy_from_slice(&p[off..]),
        qos,
        retain: flags & 0b0001 != 0,
        dup: flags & 0b1000 != 0,
        packet_id,
    })
}

fn decode_subscribe(p: &[u8]) -> Result<SubscribePacket, ProtocolError> {
    require_len(p, 2, "SUBSCRIBE packet id")?;
    let packet_id = u16::from_be_bytes([p[0], p[1]]);

    let mut filters = Vec::new();
    let mut off = 2;
    while off < p.len() {
        let (topic, next) = read_length_prefixed_string(p, off)?;
        require_topic(&topic, "SUBSCRIBE")?;
        require_len(p, next + 1, "SUBSCRIBE requested QoS")?;
        let requested_qos = QoS::try_from(p[next]).map_err(|_| {
            ProtocolError::MalformedPayload(format!("invalid requested QoS byte: 0x{:02X}", p[next]))
        })?;
        filters.push(TopicFilter {
            topic,
            requested_qos,
        });
        off = next + 1;
    }

    if filters.is_empty() {
        return Err(ProtocolError::MalformedPayload(
            "SUBSCRIBE carries no topic filters".into(),
        ));
    }
    Ok(SubscribePacket { packet_id, filters })
}

fn decode_suback(p: &[u8]) -> Result<SubAckPacket, ProtocolError> {
    require_len(p, 3, "SUBACK")?;
    let packet_id = u16::from_be_bytes([p[0], p[1]]);
    let return_codes = p[2..]
        .iter()
        .map(|&b| {
            SubscribeReturnCode::try_from(b).map_err(|_| {
                ProtocolError::MalformedPayload(format!("invalid SUBACK return code: 0x{b:02X}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SubAckPacket {
        packet_id,
        return_codes,
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn require_consumed(buf: &[u8], consumed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() > consumed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: {} unexpected trailing bytes",
            buf.len() - consumed
        )))
    } else {
        Ok(())
    }
}

fn require_empty(buf: &[u8], context: &str) -> Result<(), ProtocolError> {
    require_consumed(buf, 0, context)
}

fn require_topic(topic: &str, context: &str) -> Result<(), ProtocolError> {
    if topic.is_empty() {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: topic must not be empty"
        )))
    } else {
        Ok(())
    }
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    write_length_prefixed_bytes(buf, s.as_bytes())
}

fn write_length_prefixed_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ProtocolError> {
    let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        size: bytes.len(),
        max: u16::MAX as usize,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let (raw, end) = read_length_prefixed_slice(buf, offset)?;
    let s = std::str::from_utf8(raw)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, end))
}

fn read_length_prefixed_bytes(buf: &[u8], offset: usize) -> Result<(Bytes, usize), ProtocolError> {
    let (raw, end) = read_length_prefixed_slice(buf, offset)?;
    Ok((Bytes::copy_from_slice(raw), end))
}

fn read_length_prefixed_slice(buf: &[u8], offset: usize) -> Result<(&[u8], usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    Ok((&buf[start..start + len], start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
