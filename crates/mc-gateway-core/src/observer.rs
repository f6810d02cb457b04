//! Observation sink for wire traffic.
//!
//! The gateway reports raw bytes for every login receive/transmit and a
//! short summary for every relayed frame. Observers are purely passive:
//! nothing they do can alter protocol behavior, and the default is a
//! no-op.

use std::fmt;

use crate::error::GatewayError;

/// Which way a relayed frame is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToUpstream => f.write_str("client->upstream"),
            Self::UpstreamToClient => f.write_str("upstream->client"),
        }
    }
}

/// Hook points for observing a connection's traffic.
pub trait WireObserver: Send + Sync {
    /// Raw frame body received during login.
    fn on_receive(&self, _raw: &[u8]) {}

    /// Raw frame body about to be transmitted during login.
    fn on_transmit(&self, _raw: &[u8]) {}

    /// Summary of one relayed frame.
    fn on_frame(&self, _direction: Direction, _packet_id: i32, _len: usize) {}

    /// Terminal error of a failed handshake.
    fn on_failure(&self, _error: &GatewayError) {}
}

/// The default observer: sees everything, does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl WireObserver for NoopObserver {}

/// Observer that emits `tracing` events at debug level, with a short hex
/// preview of login traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl WireObserver for TracingObserver {
    fn on_receive(&self, raw: &[u8]) {
        tracing::debug!(len = raw.len(), bytes = %hex_preview(raw, 32), "login rx");
    }

    fn on_transmit(&self, raw: &[u8]) {
        tracing::debug!(len = raw.len(), bytes = %hex_preview(raw, 32), "login tx");
    }

    fn on_frame(&self, direction: Direction, packet_id: i32, len: usize) {
        tracing::debug!(%direction, packet_id, len, "relayed frame");
    }

    fn on_failure(&self, error: &GatewayError) {
        tracing::debug!(%error, "handshake failed");
    }
}

/// Render up to `max` bytes as space-separated hex, with an ellipsis when
/// truncated.
#[must_use]
pub fn hex_preview(bytes: &[u8], max: usize) -> String {
    let shown = &bytes[..bytes.len().min(max)];
    let mut out = String::with_capacity(shown.len() * 3 + 2);
    for (i, b) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02x}"));
    }
    if bytes.len() > max {
        out.push_str(" ..");
    }
    out
}
