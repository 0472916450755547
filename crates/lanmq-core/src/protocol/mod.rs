//! Protocol module containing packet types and the binary codec.

pub mod codec;
pub mod packets;
pub mod remaining_length;

pub use codec::{
    decode_fixed_header, decode_packet, decode_packet_limited, encode_packet, ProtocolError,
};
pub use packets::*;
pub use remaining_length::{decode_remaining_length, encode_remaining_length};
