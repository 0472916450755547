//! # lanmq-core
//!
//! Frame codec for the lanmq publish/subscribe broker.
//!
//! lanmq speaks the QoS 0 subset of MQTT 3.1.1 so that the camera pipeline,
//! the rover controller and the dashboards on a LAN can exchange short
//! control and status messages without a third-party broker.
//!
//! This crate is pure: it turns bytes into [`Packet`]s and back, and has no
//! dependency on sockets, threads or the async runtime.  The broker itself
//! lives in `lanmq-broker`.
//!
//! - **`protocol::packets`** – typed packets and wire constants.
//! - **`protocol::remaining_length`** – the 1–4 byte variable-length integer.
//! - **`protocol::codec`** – `encode_packet` / `decode_packet`.

pub mod protocol;

pub use protocol::codec::{decode_packet, decode_packet_limited, encode_packet, ProtocolError};
pub use protocol::packets::{Packet, PacketType, PublishPacket, QoS, SubscribePacket};
