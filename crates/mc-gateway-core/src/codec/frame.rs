//! Frame layer: length-prefixed frame boundaries, optional zlib payload
//! compression, optional stream encryption.
//!
//! Wire format per frame: `varint outer_length | payload`. With
//! compression active the payload is `varint uncompressed_length
//! (0 if stored raw) | compressed-or-raw bytes`; without it the payload
//! is the frame body directly. The first field of the (decompressed)
//! body is always the varint packet ID.
//!
//! Encryption sits below framing: when a session cipher is installed,
//! every raw socket byte is decrypted on arrival / encrypted before
//! transmission, independent of compression.

use std::io::{Read, Write};

use bytes::{Buf, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{put_var_i32, Reader};
use crate::crypto::{StreamDecryptor, StreamEncryptor};
use crate::error::{CodecError, GatewayError, Result};

/// Maximum frame size (2 MiB), applied to both the outer length and the
/// declared uncompressed length.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// One decoded unit of protocol traffic: the decompressed frame body,
/// packet ID varint included. These are the exact bytes the relay
/// forwards to the peer leg.
#[derive(Debug, Clone)]
pub struct Frame {
    body: Bytes,
}

impl Frame {
    /// Wrap an already-decoded frame body.
    #[must_use]
    pub fn new(body: Bytes) -> Self {
        Self { body }
    }

    /// The frame body (packet ID varint followed by the payload).
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length after decompression.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// True if the body is empty (never the case for a legal frame).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Decode the leading packet ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not start with a valid varint.
    pub fn packet_id(&self) -> Result<i32> {
        let mut reader = Reader::new(&self.body);
        Ok(reader.var_i32()?)
    }
}

/// Attempt to extract one frame from `buf`.
///
/// Returns `Ok(None)` when more bytes are needed (the suspension case);
/// consumes the frame's bytes from `buf` on success. Malformed input is
/// fatal to the connection.
fn try_decode(
    buf: &mut BytesMut,
    compression_active: bool,
    max_frame_size: usize,
) -> Result<Option<Frame>> {
    let mut reader = Reader::new(buf);
    let length = match reader.var_i32() {
        Ok(length) => length,
        Err(CodecError::Incomplete) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    // A negative length can only come from a sign-extended 5-byte
    // varint, which is out of domain for a frame length.
    if length <= 0 {
        return Err(CodecError::InvalidVarint.into());
    }
    let length = length as usize;
    if length > max_frame_size {
        return Err(GatewayError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    let header_len = reader.position();
    if buf.len() - header_len < length {
        buf.reserve(header_len + length - buf.len());
        return Ok(None);
    }

    buf.advance(header_len);
    let payload = buf.split_to(length).freeze();

    if !compression_active {
        return Ok(Some(Frame::new(payload)));
    }

    let mut reader = Reader::new(&payload);
    let declared = reader.var_i32().map_err(GatewayError::from)?;
    if declared < 0 || declared as usize > max_frame_size {
        return Err(GatewayError::FrameTooLarge {
            size: declared.max(0) as usize,
            max: max_frame_size,
        });
    }
    let data = payload.slice(reader.position()..);

    if declared == 0 {
        // At or below the threshold: stored raw.
        return Ok(Some(Frame::new(data)));
    }

    let mut inflated = Vec::with_capacity(declared as usize);
    ZlibDecoder::new(&data[..])
        .read_to_end(&mut inflated)
        .map_err(|e| GatewayError::Decompression(e.to_string()))?;
    if inflated.len() != declared as usize {
        return Err(GatewayError::Decompression(format!(
            "inflated to {} bytes, declared {declared}",
            inflated.len()
        )));
    }
    Ok(Some(Frame::new(Bytes::from(inflated))))
}

/// Encode one frame body into its on-wire form (compression applied,
/// length prefixes prepended, not yet encrypted).
fn encode(body: &[u8], compression_threshold: Option<i32>) -> Result<BytesMut> {
    let mut payload = BytesMut::with_capacity(body.len() + 8);
    match compression_threshold {
        Some(threshold) if body.len() > threshold.max(0) as usize => {
            put_var_i32(&mut payload, body.len() as i32);
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body).map_err(GatewayError::Connection)?;
            let compressed = encoder.finish().map_err(GatewayError::Connection)?;
            payload.extend_from_slice(&compressed);
        }
        Some(_) => {
            put_var_i32(&mut payload, 0);
            payload.extend_from_slice(body);
        }
        None => payload.extend_from_slice(body),
    }

    let mut out = BytesMut::with_capacity(payload.len() + 5);
    put_var_i32(&mut out, payload.len() as i32);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Reading half of a framed stream.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    decryptor: Option<StreamDecryptor>,
    compression_active: bool,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a byte stream with no compression and no encryption.
    #[must_use]
    pub fn new(io: R) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(8 * 1024),
            decryptor: None,
            compression_active: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Override the maximum accepted frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Install the session cipher.
    ///
    /// Bytes already buffered arrived after the packet that completed the
    /// key exchange, so they are ciphertext: they are decrypted here.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret has the wrong length.
    pub fn enable_encryption(&mut self, secret: &[u8]) -> Result<()> {
        let mut decryptor = StreamDecryptor::new(secret)?;
        decryptor.decrypt(&mut self.buf);
        self.decryptor = Some(decryptor);
        Ok(())
    }

    /// Activate compressed framing for subsequent frames.
    pub fn enable_compression(&mut self) {
        self.compression_active = true;
    }

    /// Read one frame, awaiting more bytes as needed.
    ///
    /// # Errors
    ///
    /// Fails on malformed framing, oversized or undecompressible frames,
    /// and transport errors. A clean peer close surfaces as an
    /// `UnexpectedEof` connection error.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = try_decode(&mut self.buf, self.compression_active, self.max_frame_size)? {
                return Ok(frame);
            }
            self.fill().await?;
        }
    }

    /// Look at the next byte without consuming it, filling the buffer if
    /// needed. Used to sniff the legacy ping before framing begins.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or peer close.
    pub async fn peek_byte(&mut self) -> Result<u8> {
        while self.buf.is_empty() {
            self.fill().await?;
        }
        Ok(self.buf[0])
    }

    /// Consume up to `n` raw (post-decryption) bytes from the stream,
    /// reading at least one. Used by the unframed legacy exchange.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or peer close.
    pub async fn read_raw(&mut self, n: usize) -> Result<Bytes> {
        while self.buf.is_empty() {
            self.fill().await?;
        }
        let take = n.min(self.buf.len());
        Ok(self.buf.split_to(take).freeze())
    }

    async fn fill(&mut self) -> Result<()> {
        let old_len = self.buf.len();
        let n = self.io.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(GatewayError::Connection(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )));
        }
        if let Some(decryptor) = &mut self.decryptor {
            decryptor.decrypt(&mut self.buf[old_len..]);
        }
        Ok(())
    }
}

/// Writing half of a framed stream.
pub struct FrameWriter<W> {
    io: W,
    encryptor: Option<StreamEncryptor>,
    compression_threshold: Option<i32>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a byte stream with no compression and no encryption.
    #[must_use]
    pub fn new(io: W) -> Self {
        Self {
            io,
            encryptor: None,
            compression_threshold: None,
        }
    }

    /// Install the session cipher for subsequent writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret has the wrong length.
    pub fn enable_encryption(&mut self, secret: &[u8]) -> Result<()> {
        self.encryptor = Some(StreamEncryptor::new(secret)?);
        Ok(())
    }

    /// Activate compressed framing: bodies longer than `threshold` are
    /// deflated, the rest carry an uncompressed-length field of zero.
    pub fn enable_compression(&mut self, threshold: i32) {
        self.compression_threshold = Some(threshold);
    }

    /// Frame, optionally compress, optionally encrypt, and send `body`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let mut out = encode(body, self.compression_threshold)?;
        if let Some(encryptor) = &mut self.encryptor {
            encryptor.encrypt(&mut out);
        }
        self.io.write_all(&out).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Write raw bytes with no framing or encryption (legacy exchange
    /// only, which predates both).
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.io.write_all(bytes).await?;
        self.io.flush().await?;
        Ok(())
    }
}
