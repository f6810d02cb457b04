//! Handshaking-phase packets.

use bytes::{BufMut, BytesMut};

use crate::codec::{put_string, put_var_enum, put_var_i32, Reader, WireEnum};
use crate::error::{GatewayError, Result};

use super::Packet;

/// Serverbound packet IDs for the handshaking phase.
pub mod ids {
    pub const HANDSHAKE: i32 = 0x00;
}

/// The session type a client requests in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    /// Server-list query: one status response and the connection closes.
    Status,
    /// Full login, leading to an upstream session.
    Login,
}

impl WireEnum for NextState {
    const NAME: &'static str = "NextState";

    fn from_discriminant(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Status),
            2 => Some(Self::Login),
            _ => None,
        }
    }

    fn discriminant(self) -> i32 {
        match self {
            Self::Status => 1,
            Self::Login => 2,
        }
    }
}

/// The first frame of every modern connection: protocol version, the
/// address the client dialed, and the intended next state.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
}

impl Handshake {
    /// Validate fields the codec cannot check structurally.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HandshakeValidation`] for an impossible
    /// protocol version. The next-state discriminant was already
    /// validated against its closed set during parsing.
    pub fn validate(&self) -> Result<()> {
        if self.protocol_version <= 0 {
            return Err(GatewayError::HandshakeValidation(format!(
                "protocol version {} is not positive",
                self.protocol_version
            )));
        }
        Ok(())
    }
}

impl Packet for Handshake {
    const ID: i32 = ids::HANDSHAKE;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            protocol_version: reader.var_i32()?,
            server_address: reader.string_limited(255)?,
            server_port: reader.u16()?,
            next_state: reader.var_enum()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        put_var_i32(buf, self.protocol_version);
        put_string(buf, &self.server_address);
        buf.put_u16(self.server_port);
        put_var_enum(buf, self.next_state);
    }
}

/// Tagged union over the serverbound handshaking set.
#[derive(Debug, Clone, Default)]
pub enum HandshakeServerbound {
    /// Not-yet-parsed sentinel.
    #[default]
    Empty,
    Handshake(Handshake),
}

impl HandshakeServerbound {
    /// Decode a frame body by its leading ID.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidPacket`] for an ID outside the set.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        match reader.var_i32()? {
            ids::HANDSHAKE => Ok(Self::Handshake(Handshake::decode_body(&mut reader)?)),
            id => Err(GatewayError::InvalidPacket { id }),
        }
    }

    /// The active variant's wire ID, `None` for the empty sentinel.
    #[must_use]
    pub fn id(&self) -> Option<i32> {
        match self {
            Self::Empty => None,
            Self::Handshake(_) => Some(Handshake::ID),
        }
    }

    /// Encode the active variant as a frame body.
    ///
    /// # Panics
    ///
    /// Encoding the empty sentinel is a programming error.
    #[must_use]
    pub fn encode(&self) -> bytes::Bytes {
        match self {
            Self::Empty => unreachable!("attempted to encode an empty packet"),
            Self::Handshake(p) => p.encode_frame(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    fn sample() -> Handshake {
        Handshake {
            protocol_version: 578,
            server_address: "play.example.net".to_string(),
            server_port: 25565,
            next_state: NextState::Login,
        }
    }

    #[test]
    fn test_handshake_roundtrip() {
        let body = sample().encode_frame();
        let decoded = HandshakeServerbound::decode(&body).unwrap();
        assert_eq!(decoded.id(), Some(0x00));
        let HandshakeServerbound::Handshake(h) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(h.protocol_version, 578);
        assert_eq!(h.server_address, "play.example.net");
        assert_eq!(h.server_port, 25565);
        assert_eq!(h.next_state, NextState::Login);
    }

    #[test]
    fn test_unknown_id_is_invalid_packet() {
        let body = [0x19, 0x00];
        assert!(matches!(
            HandshakeServerbound::decode(&body),
            Err(GatewayError::InvalidPacket { id: 0x19 })
        ));
    }

    #[test]
    fn test_bad_next_state_is_invalid_enum() {
        let mut body = BytesMut::new();
        put_var_i32(&mut body, Handshake::ID);
        put_var_i32(&mut body, 578);
        put_string(&mut body, "host");
        body.put_u16(25565);
        put_var_i32(&mut body, 7); // neither status nor login

        let result = HandshakeServerbound::decode(&body);
        assert!(matches!(
            result,
            Err(GatewayError::Codec(CodecError::InvalidEnum {
                name: "NextState",
                value: 7,
            }))
        ));
    }

    #[test]
    fn test_validate_rejects_nonpositive_version() {
        let mut handshake = sample();
        handshake.protocol_version = 0;
        assert!(matches!(
            handshake.validate(),
            Err(GatewayError::HandshakeValidation(_))
        ));
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_empty_union_has_no_id() {
        assert_eq!(HandshakeServerbound::default().id(), None);
    }
}
