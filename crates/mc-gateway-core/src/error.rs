//! Domain error types for the Minecraft relay gateway.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//!
//! The split matters: [`CodecError::Incomplete`] is not a failure at all
//! but a signal that the frame layer must await more bytes. It is handled
//! inside the frame layer and never crosses into [`GatewayError`].

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// Upstream host must not be empty.
    #[error("upstream host must not be empty")]
    MissingUpstreamHost,

    /// Compression threshold out of the protocol's representable range.
    #[error("compression threshold {0} out of range (0..=2097151)")]
    InvalidCompressionThreshold(i32),

    /// RSA key size too small to carry a login shared secret.
    #[error("server key size must be at least 512 bits, got {0}")]
    KeySizeTooSmall(usize),

    /// RSA key generation failed.
    #[error("server key generation failed: {0}")]
    KeyGeneration(String),
}

/// Errors raised while decoding primitive wire types.
///
/// `Incomplete` is recoverable (read more bytes); every other variant is
/// malformed input and fatal to the frame being decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input exhausted before a complete value was decoded.
    #[error("incomplete input: more bytes required")]
    Incomplete,

    /// A varint carried a continuation bit past the 32-bit domain.
    #[error("invalid varint: value exceeds 32 bits")]
    InvalidVarint,

    /// A varint-encoded discriminant matched no legal enum value.
    #[error("invalid enum discriminant {value} for {name}")]
    InvalidEnum { name: &'static str, value: i32 },

    /// A string's declared byte length exceeds its character limit.
    #[error("invalid string: declared {declared} bytes, limit {limit}")]
    InvalidString { declared: i32, limit: usize },

    /// A byte array's declared length exceeds the caller's limit.
    #[error("invalid array: declared {declared} bytes, limit {limit}")]
    InvalidArray { declared: i32, limit: usize },
}

impl CodecError {
    /// True if this is the "await more input" signal rather than a
    /// malformed-input failure.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }
}

/// Errors that occur during gateway operation.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Malformed primitive field inside a frame.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Frame ID matched no packet type in the active phase.
    #[error("invalid packet: unknown id {id:#04x} for current phase")]
    InvalidPacket { id: i32 },

    /// Well-formed frame, but the wrong packet for the current state.
    #[error("unexpected packet: expected id {expected:#04x}, got {actual:#04x}")]
    UnexpectedPacket { expected: i32, actual: i32 },

    /// Handshake fields failed validation.
    #[error("handshake validation failed: {0}")]
    HandshakeValidation(String),

    /// RSA decryption of the shared secret or verify token failed.
    #[error("failed to decrypt login payload")]
    DecryptionFailed,

    /// The echoed verify token does not match the one we sent.
    #[error("verify token mismatch")]
    VerifyTokenMismatch,

    /// Frame length prefix exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Compressed frame body failed to inflate to its declared size.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Upstream server is not reachable or refused the session.
    #[error("upstream {address} unavailable: {message}")]
    UpstreamUnavailable { address: String, message: String },

    /// The upstream refused the login with a disconnect reason.
    #[error("upstream disconnected during login: {0}")]
    UpstreamDisconnect(String),

    /// Explicitly reserved path that is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Shutdown signal received.
    #[error("gateway shutting down")]
    Shutdown,
}

impl GatewayError {
    /// True for terminal conditions that are part of normal operation
    /// (deliberate shutdown, peer hangup) and should not be logged as
    /// errors.
    #[must_use]
    pub fn is_benign_disconnect(&self) -> bool {
        match self {
            Self::Shutdown => true,
            Self::Connection(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for primitive codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;
