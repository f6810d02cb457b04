//! Status-phase packets (server-list query).

use bytes::{BufMut, BytesMut};

use crate::codec::{put_string, Reader};
use crate::error::{GatewayError, Result};

use super::Packet;

/// Serverbound packet IDs for the status phase.
pub mod serverbound_ids {
    pub const STATUS_REQUEST: i32 = 0x00;
    pub const PING_REQUEST: i32 = 0x01;
}

/// Clientbound packet IDs for the status phase.
pub mod clientbound_ids {
    pub const STATUS_RESPONSE: i32 = 0x00;
    pub const PONG_RESPONSE: i32 = 0x01;
}

/// Empty request for the server-list JSON.
#[derive(Debug, Clone, Default)]
pub struct StatusRequest;

impl Packet for StatusRequest {
    const ID: i32 = serverbound_ids::STATUS_REQUEST;

    fn decode_body(_reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self)
    }

    fn encode_body(&self, _buf: &mut BytesMut) {}
}

/// Latency probe; the payload is echoed back verbatim.
#[derive(Debug, Clone, Default)]
pub struct PingRequest {
    pub payload: i64,
}

impl Packet for PingRequest {
    const ID: i32 = serverbound_ids::PING_REQUEST;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            payload: reader.i64()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_i64(self.payload);
    }
}

/// The server-list JSON document.
#[derive(Debug, Clone, Default)]
pub struct StatusResponse {
    pub json: String,
}

impl StatusResponse {
    /// Assemble the status document for this gateway.
    ///
    /// The client's own protocol version is echoed back so every
    /// launcher considers itself compatible with the relay.
    #[must_use]
    pub fn build(description: &str, max_players: u32, protocol_version: i32) -> Self {
        let json = format!(
            r#"{{"version":{{"name":"relay","protocol":{protocol_version}}},"players":{{"max":{max_players},"online":0}},"description":{{"text":"{}"}}}}"#,
            escape_json(description)
        );
        Self { json }
    }
}

fn escape_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

impl Packet for StatusResponse {
    const ID: i32 = clientbound_ids::STATUS_RESPONSE;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            json: reader.string()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        put_string(buf, &self.json);
    }
}

/// Echo of a [`PingRequest`].
#[derive(Debug, Clone, Default)]
pub struct PongResponse {
    pub payload: i64,
}

impl Packet for PongResponse {
    const ID: i32 = clientbound_ids::PONG_RESPONSE;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            payload: reader.i64()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_i64(self.payload);
    }
}

/// Tagged union over the serverbound status set.
#[derive(Debug, Clone, Default)]
pub enum StatusServerbound {
    /// Not-yet-parsed sentinel.
    #[default]
    Empty,
    StatusRequest(StatusRequest),
    PingRequest(PingRequest),
}

impl StatusServerbound {
    /// Decode a frame body by its leading ID.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidPacket`] for an ID outside the set.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        match reader.var_i32()? {
            serverbound_ids::STATUS_REQUEST => {
                Ok(Self::StatusRequest(StatusRequest::decode_body(&mut reader)?))
            }
            serverbound_ids::PING_REQUEST => {
                Ok(Self::PingRequest(PingRequest::decode_body(&mut reader)?))
            }
            id => Err(GatewayError::InvalidPacket { id }),
        }
    }

    /// The active variant's wire ID, `None` for the empty sentinel.
    #[must_use]
    pub fn id(&self) -> Option<i32> {
        match self {
            Self::Empty => None,
            Self::StatusRequest(_) => Some(StatusRequest::ID),
            Self::PingRequest(_) => Some(PingRequest::ID),
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
            Self::StatusRequest(p) => p.encode_frame(),
            Self::PingRequest(p) => p.encode_frame(),
        }
    }
}

/// Tagged union over the clientbound status set.
#[derive(Debug, Clone, Default)]
pub enum StatusClientbound {
    /// Not-yet-parsed sentinel.
    #[default]
    Empty,
    StatusResponse(StatusResponse),
    PongResponse(PongResponse),
}

impl StatusClientbound {
    /// Decode a frame body by its leading ID.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidPacket`] for an ID outside the set.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        match reader.var_i32()? {
            clientbound_ids::STATUS_RESPONSE => Ok(Self::StatusResponse(
                StatusResponse::decode_body(&mut reader)?,
            )),
            clientbound_ids::PONG_RESPONSE => {
                Ok(Self::PongResponse(PongResponse::decode_body(&mut reader)?))
            }
            id => Err(GatewayError::InvalidPacket { id }),
        }
    }

    /// The active variant's wire ID, `None` for the empty sentinel.
    #[must_use]
    pub fn id(&self) -> Option<i32> {
        match self {
            Self::Empty => None,
            Self::StatusResponse(_) => Some(StatusResponse::ID),
            Self::PongResponse(_) => Some(PongResponse::ID),
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
            Self::StatusResponse(p) => p.encode_frame(),
            Self::PongResponse(p) => p.encode_frame(),
        }
    }
}
