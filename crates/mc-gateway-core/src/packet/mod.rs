//! Typed packet representation and ID-keyed dispatch.
//!
//! Each protocol phase and direction has a closed set of packet types.
//! The per-phase `ids` tables plus the `decode` match on them form the
//! dispatch: the leading varint of a frame body selects the type, the
//! type's own parser consumes the rest. An ID outside the active set is
//! [`GatewayError::InvalidPacket`]; a well-formed frame that is not the
//! packet a state machine requires is
//! [`GatewayError::UnexpectedPacket`].

pub mod handshake;
pub mod login;
pub mod status;

pub use handshake::{Handshake, HandshakeServerbound, NextState};
pub use login::{
    EncryptionRequest, EncryptionResponse, LoginClientbound, LoginDisconnect, LoginServerbound,
    LoginStart, LoginSuccess, SetCompression,
};
pub use status::{
    PingRequest, PongResponse, StatusClientbound, StatusRequest, StatusResponse,
    StatusServerbound,
};

use bytes::{Bytes, BytesMut};

use crate::codec::{put_var_i32, Reader};
use crate::codec::frame::Frame;
use crate::error::{GatewayError, Result};

/// A typed packet with a phase-scoped numeric ID.
pub trait Packet: Sized {
    /// Wire ID within this packet's phase and direction.
    const ID: i32;

    /// Parse the packet fields (the ID varint has already been consumed).
    ///
    /// # Errors
    ///
    /// Fails on malformed or truncated fields.
    fn decode_body(reader: &mut Reader<'_>) -> Result<Self>;

    /// Append the packet fields (without the ID varint).
    fn encode_body(&self, buf: &mut BytesMut);

    /// Encode the full frame body: ID varint followed by the fields.
    fn encode_frame(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_var_i32(&mut buf, Self::ID);
        self.encode_body(&mut buf);
        buf.freeze()
    }
}

/// Parse `frame` as a specific packet type.
///
/// This is the primitive the login state machine is built on: the frame
/// must carry exactly `P`'s ID, anything else is an ordering violation.
///
/// # Errors
///
/// Returns [`GatewayError::UnexpectedPacket`] on an ID mismatch, or the
/// underlying parse failure.
pub fn expect_packet<P: Packet>(frame: &Frame) -> Result<P> {
    let mut reader = Reader::new(frame.body());
    let actual = reader.var_i32()?;
    if actual != P::ID {
        return Err(GatewayError::UnexpectedPacket {
            expected: P::ID,
            actual,
        });
    }
    P::decode_body(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_packet_accepts_matching_id() {
        let packet = LoginStart {
            name: "Alice".to_string(),
        };
        let frame = Frame::new(packet.encode_frame());
        let parsed: LoginStart = expect_packet(&frame).unwrap();
        assert_eq!(parsed.name, "Alice");
    }

    #[test]
    fn test_expect_packet_rejects_wrong_id() {
        let packet = LoginStart {
            name: "Alice".to_string(),
        };
        let frame = Frame::new(packet.encode_frame());
        let result: Result<EncryptionResponse> = expect_packet(&frame);
        assert!(matches!(
            result,
            Err(GatewayError::UnexpectedPacket {
                expected: 0x01,
                actual: 0x00,
            })
        ));
    }
}
