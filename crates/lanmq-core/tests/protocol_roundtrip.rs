//! Integration tests for the lanmq-core frame codec.
//!
//! These drive the public API the way a connection loop does: bytes arrive
//! in arbitrary chunks, accumulate in a buffer, and whole frames are peeled
//! off the front as soon as they are complete.

use lanmq_core::{
    decode_packet, decode_packet_limited, encode_packet,
    protocol::{
        packets::{
            ConnAckPacket, ConnectPacket, ConnectReturnCode, SubAckPacket, SubscribeReturnCode,
        },
        remaining_length::{decode_remaining_length, encode_remaining_length},
    },
    Packet, ProtocolError, PublishPacket, QoS, SubscribePacket,
};

/// Feeds `stream` to the decoder `chunk` bytes at a time and returns every
/// packet extracted, in order.
fn decode_stream(stream: &[u8], chunk: usize) -> Result<Vec<Packet>, ProtocolError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut packets = Vec::new();
    for piece in stream.chunks(chunk) {
        buf.extend_from_slice(piece);
        loop {
            match decode_packet(&buf) {
                Ok((packet, consumed)) => {
                    buf.drain(..consumed);
                    packets.push(packet);
                }
                Err(e) if e.is_incomplete() => break,
                Err(e) => return Err(e),
            }
        }
    }
    assert!(buf.is_empty(), "stream left {} undecoded bytes", buf.len());
    Ok(packets)
}

fn client_session() -> Vec<Packet> {
    vec![
        Packet::Connect(ConnectPacket::new("sensor1", 60)),
        Packet::Subscribe(SubscribePacket::single(7, "rover/control")),
        Packet::Publish(PublishPacket::at_most_once("camera/status", &b"online"[..])),
        Packet::Publish(PublishPacket::at_most_once("camera/frame", vec![0xEEu8; 1000])),
        Packet::PingReq,
        Packet::Disconnect,
    ]
}

#[test]
fn test_stream_decodes_identically_for_every_chunk_size() {
    // Arrange
    let packets = client_session();
    let stream: Vec<u8> = packets
        .iter()
        .flat_map(|p| encode_packet(p).expect("encode must succeed"))
        .collect();

    // Act / Assert
    for chunk in [1, 2, 3, 7, 64, 1024, stream.len()] {
        let decoded = decode_stream(&stream, chunk).expect("stream must decode");
        assert_eq!(decoded, packets, "chunk size {chunk}");
    }
}

#[test]
fn test_broker_replies_decode_to_expected_values() {
    let stream: Vec<u8> = [
        encode_packet(&Packet::ConnAck(ConnAckPacket::accepted())).unwrap(),
        encode_packet(&Packet::SubAck(SubAckPacket {
            packet_id: 7,
            return_codes: vec![SubscribeReturnCode::Granted(QoS::AtMostOnce)],
        }))
        .unwrap(),
        encode_packet(&Packet::PingResp).unwrap(),
    ]
    .concat();

    let decoded = decode_stream(&stream, 1).unwrap();

    assert_eq!(decoded.len(), 3);
    match &decoded[0] {
        Packet::ConnAck(ack) => {
            assert_eq!(ack.return_code, ConnectReturnCode::Accepted);
            assert!(!ack.session_present);
        }
        other => panic!("expected CONNACK, got {other:?}"),
    }
    match &decoded[1] {
        Packet::SubAck(ack) => {
            assert_eq!(ack.packet_id, 7);
            assert_eq!(ack.return_codes, vec![SubscribeReturnCode::Granted(QoS::AtMostOnce)]);
        }
        other => panic!("expected SUBACK, got {other:?}"),
    }
    assert_eq!(decoded[2], Packet::PingResp);
}

#[test]
fn test_violation_mid_stream_surfaces_after_valid_frames() {
    // Arrange: a PINGREQ followed by a frame with type nibble 0.
    let mut stream = encode_packet(&Packet::PingReq).unwrap();
    stream.extend_from_slice(&[0x00, 0x00]);

    // Act
    let result = decode_stream(&stream, 4);

    // Assert
    assert_eq!(result, Err(ProtocolError::UnknownPacketType(0)));
}

#[test]
fn test_oversized_frame_is_rejected_from_header_alone() {
    let publish = Packet::Publish(PublishPacket::at_most_once("t", vec![0u8; 2048]));
    let bytes = encode_packet(&publish).unwrap();

    // Only the fixed header has "arrived".
    let result = decode_packet_limited(&bytes[..3], 1024);

    assert!(matches!(
        result,
        Err(ProtocolError::RemainingLengthExceeded { max: 1024, .. })
    ));
}

#[test]
fn test_remaining_length_boundary_values() {
    for &len in &[0usize, 127, 128, 16_383, 16_384, 2_097_151] {
        let mut buf = Vec::new();
        encode_remaining_length(len, &mut buf).unwrap();
        assert_eq!(decode_remaining_length(&buf), Ok((len, buf.len())), "len {len}");
    }
}

#[test]
fn test_remaining_length_rejects_fourth_continuation_byte() {
    assert_eq!(
        decode_remaining_length(&[0x80, 0x80, 0x80, 0x80]),
        Err(ProtocolError::MalformedRemainingLength)
    );
}

#[test]
fn test_topics_are_case_sensitive_and_literal() {
    let packets = vec![
        Packet::Subscribe(SubscribePacket::single(1, "Rover/Control")),
        Packet::Subscribe(SubscribePacket::single(2, "rover/#")),
        Packet::Publish(PublishPacket::at_most_once("rover/+", &b"x"[..])),
    ];
    let stream: Vec<u8> = packets.iter().flat_map(|p| encode_packet(p).unwrap()).collect();

    let decoded = decode_stream(&stream, 5).unwrap();

    assert_eq!(decoded, packets);
}
