//! Login-phase packets, including the key-exchange pair.

use bytes::BytesMut;

use crate::codec::{put_byte_array, put_string, put_var_i32, Reader};
use crate::error::{GatewayError, Result};

use super::Packet;

/// Serverbound packet IDs for the login phase.
pub mod serverbound_ids {
    pub const LOGIN_START: i32 = 0x00;
    pub const ENCRYPTION_RESPONSE: i32 = 0x01;
}

/// Clientbound packet IDs for the login phase.
pub mod clientbound_ids {
    pub const DISCONNECT: i32 = 0x00;
    pub const ENCRYPTION_REQUEST: i32 = 0x01;
    pub const LOGIN_SUCCESS: i32 = 0x02;
    pub const SET_COMPRESSION: i32 = 0x03;
}

/// Byte limit for the RSA blocks in an encryption response. A 1024-bit
/// key produces 128-byte blocks; leave headroom for larger server keys.
const ENCRYPTED_BLOCK_LIMIT: usize = 512;

/// Opens the login: carries the player name.
#[derive(Debug, Clone, Default)]
pub struct LoginStart {
    pub name: String,
}

impl Packet for LoginStart {
    const ID: i32 = serverbound_ids::LOGIN_START;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            name: reader.string_limited(16)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        put_string(buf, &self.name);
    }
}

/// The client's half of the key exchange: the shared secret and the
/// echoed verify token, both encrypted under the server's public key.
#[derive(Debug, Clone, Default)]
pub struct EncryptionResponse {
    pub shared_secret: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl Packet for EncryptionResponse {
    const ID: i32 = serverbound_ids::ENCRYPTION_RESPONSE;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            shared_secret: reader.byte_array_limited(ENCRYPTED_BLOCK_LIMIT)?,
            verify_token: reader.byte_array_limited(ENCRYPTED_BLOCK_LIMIT)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        put_byte_array(buf, &self.shared_secret);
        put_byte_array(buf, &self.verify_token);
    }
}

/// Login rejection with a human-readable reason.
#[derive(Debug, Clone, Default)]
pub struct LoginDisconnect {
    pub reason: String,
}

impl Packet for LoginDisconnect {
    const ID: i32 = clientbound_ids::DISCONNECT;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            reason: reader.string()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        put_string(buf, &self.reason);
    }
}

/// The server's half of the key exchange: server ID string, SPKI-encoded
/// public key, and a fresh random verify token.
#[derive(Debug, Clone, Default)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl Packet for EncryptionRequest {
    const ID: i32 = clientbound_ids::ENCRYPTION_REQUEST;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            server_id: reader.string_limited(20)?,
            public_key: reader.byte_array_limited(ENCRYPTED_BLOCK_LIMIT)?,
            verify_token: reader.byte_array_limited(ENCRYPTED_BLOCK_LIMIT)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        put_string(buf, &self.server_id);
        put_byte_array(buf, &self.public_key);
        put_byte_array(buf, &self.verify_token);
    }
}

/// Completes the login: session UUID (string form) and confirmed name.
#[derive(Debug, Clone, Default)]
pub struct LoginSuccess {
    pub uuid: String,
    pub username: String,
}

impl Packet for LoginSuccess {
    const ID: i32 = clientbound_ids::LOGIN_SUCCESS;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            uuid: reader.string_limited(36)?,
            username: reader.string_limited(16)?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        put_string(buf, &self.uuid);
        put_string(buf, &self.username);
    }
}

/// Switches the connection to compressed framing from the next frame on.
#[derive(Debug, Clone, Default)]
pub struct SetCompression {
    pub threshold: i32,
}

impl Packet for SetCompression {
    const ID: i32 = clientbound_ids::SET_COMPRESSION;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            threshold: reader.var_i32()?,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        put_var_i32(buf, self.threshold);
    }
}

/// Tagged union over the serverbound login set.
#[derive(Debug, Clone, Default)]
pub enum LoginServerbound {
    /// Not-yet-parsed sentinel.
    #[default]
    Empty,
    LoginStart(LoginStart),
    EncryptionResponse(EncryptionResponse),
}

impl LoginServerbound {
    /// Decode a frame body by its leading ID.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidPacket`] for an ID outside the set.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        match reader.var_i32()? {
            serverbound_ids::LOGIN_START => {
                Ok(Self::LoginStart(LoginStart::decode_body(&mut reader)?))
            }
            serverbound_ids::ENCRYPTION_RESPONSE => Ok(Self::EncryptionResponse(
                EncryptionResponse::decode_body(&mut reader)?,
            )),
            id => Err(GatewayError::InvalidPacket { id }),
        }
    }

    /// The active variant's wire ID, `None` for the empty sentinel.
    #[must_use]
    pub fn id(&self) -> Option<i32> {
        match self {
            Self::Empty => None,
            Self::LoginStart(_) => Some(LoginStart::ID),
            Self::EncryptionResponse(_) => Some(EncryptionResponse::ID),
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
            Self::LoginStart(p) => p.encode_frame(),
            Self::EncryptionResponse(p) => p.encode_frame(),
        }
    }
}

/// Tagged union over the clientbound login set.
#[derive(Debug, Clone, Default)]
pub enum LoginClientbound {
    /// Not-yet-parsed sentinel.
    #[default]
    Empty,
    Disconnect(LoginDisconnect),
    EncryptionRequest(EncryptionRequest),
    LoginSuccess(LoginSuccess),
    SetCompression(SetCompression),
}

impl LoginClientbound {
    /// Decode a frame body by its leading ID.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidPacket`] for an ID outside the set.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        match reader.var_i32()? {
            clientbound_ids::DISCONNECT => {
                Ok(Self::Disconnect(LoginDisconnect::decode_body(&mut reader)?))
            }
            clientbound_ids::ENCRYPTION_REQUEST => Ok(Self::EncryptionRequest(
                EncryptionRequest::decode_body(&mut reader)?,
            )),
            clientbound_ids::LOGIN_SUCCESS => {
                Ok(Self::LoginSuccess(LoginSuccess::decode_body(&mut reader)?))
            }
            clientbound_ids::SET_COMPRESSION => Ok(Self::SetCompression(
                SetCompression::decode_body(&mut reader)?,
            )),
            id => Err(GatewayError::InvalidPacket { id }),
        }
    }

    /// The active variant's wire ID, `None` for the empty sentinel.
    #[must_use]
    pub fn id(&self) -> Option<i32> {
        match self {
            Self::Empty => None,
            Self::Disconnect(_) => Some(LoginDisconnect::ID),
            Self::EncryptionRequest(_) => Some(EncryptionRequest::ID),
            Self::LoginSuccess(_) => Some(LoginSuccess::ID),
            Self::SetCompression(_) => Some(SetCompression::ID),
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
            Self::Disconnect(p) => p.encode_frame(),
            Self::EncryptionRequest(p) => p.encode_frame(),
            Self::LoginSuccess(p) => p.encode_frame(),
            Self::SetCompression(p) => p.encode_frame(),
        }
    }
}
