//! Per-connection lifecycle.
//!
//! Each accepted socket walks: legacy-ping probe, handshake, then either
//! a status exchange (answered directly, connection closes) or the full
//! login relay: server-side login against the client, upstream resolve +
//! connect, client-side login against the upstream, and finally the two
//! forwarding loops until either side ends.
//!
//! All state here is owned by the one connection; nothing is shared
//! across connections except the shutdown channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::codec::frame::{FrameReader, FrameWriter};
use crate::config::GatewayConfig;
use crate::crypto::ServerKey;
use crate::error::{GatewayError, Result};
use crate::login::{self, ConnectParams, ServerLoginParams, TokenSource};
use crate::observer::{Direction, WireObserver};
use crate::packet::{Handshake, NextState, Packet, PongResponse, StatusResponse, StatusServerbound};

use super::legacy;

/// Handles a single accepted client connection.
pub struct ConnectionHandler {
    config: Arc<GatewayConfig>,
    server_key: Arc<ServerKey>,
    server_id: String,
    connection_id: String,
    shutdown_rx: broadcast::Receiver<()>,
    observer: Arc<dyn WireObserver>,
    tokens: Arc<dyn TokenSource>,
}

impl ConnectionHandler {
    /// Create a new connection handler.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<GatewayConfig>,
        server_key: Arc<ServerKey>,
        server_id: String,
        connection_id: String,
        shutdown_rx: broadcast::Receiver<()>,
        observer: Arc<dyn WireObserver>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            config,
            server_key,
            server_id,
            connection_id,
            shutdown_rx,
            observer,
            tokens,
        }
    }

    /// Drive the connection to completion or shutdown.
    ///
    /// # Errors
    ///
    /// Returns the terminal error of the lifecycle; deliberate shutdown
    /// surfaces as [`GatewayError::Shutdown`].
    #[instrument(skip(self, socket), fields(
        connection_id = %self.connection_id,
        peer = %socket.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string()),
    ))]
    pub async fn handle(self, socket: TcpStream) -> Result<()> {
        info!("client connected");

        let (read_half, write_half) = socket.into_split();
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);
        let mut shutdown_rx = self.shutdown_rx.resubscribe();

        tokio::select! {
            result = self.run(&mut reader, &mut writer) => result,
            _ = shutdown_rx.recv() => {
                debug!("shutdown during connection handling");
                Err(GatewayError::Shutdown)
            }
        }
    }

    async fn run(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut FrameWriter<OwnedWriteHalf>,
    ) -> Result<()> {
        // Legacy pings predate framing and must be sniffed first.
        if reader.peek_byte().await? == legacy::LEGACY_PING_LEAD {
            info!("legacy ping request");
            return legacy::answer_legacy_ping(reader, writer, &self.config.status).await;
        }

        let handshake = login::read_handshake(reader, self.observer.as_ref()).await?;
        debug!(
            protocol_version = handshake.protocol_version,
            next_state = ?handshake.next_state,
            "handshake"
        );

        match handshake.next_state {
            NextState::Status => {
                self.serve_status(reader, writer, handshake.protocol_version)
                    .await
            }
            NextState::Login => self.relay_session(reader, writer, handshake).await,
        }
    }

    /// Answer the status exchange and close.
    async fn serve_status(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut FrameWriter<OwnedWriteHalf>,
        protocol_version: i32,
    ) -> Result<()> {
        loop {
            let frame = match reader.read_frame().await {
                Ok(frame) => frame,
                Err(e) if e.is_benign_disconnect() => return Ok(()),
                Err(e) => return Err(e),
            };
            match StatusServerbound::decode(frame.body())? {
                StatusServerbound::StatusRequest(_) => {
                    let response = StatusResponse::build(
                        &self.config.status.motd,
                        self.config.status.max_players,
                        protocol_version,
                    );
                    writer.write_frame(&response.encode_frame()).await?;
                }
                StatusServerbound::PingRequest(ping) => {
                    let pong = PongResponse {
                        payload: ping.payload,
                    };
                    writer.write_frame(&pong.encode_frame()).await?;
                    return Ok(());
                }
                StatusServerbound::Empty => {
                    unreachable!("decode never yields the empty sentinel")
                }
            }
        }
    }

    /// Run both login halves, then relay frames until either side ends.
    async fn relay_session(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut FrameWriter<OwnedWriteHalf>,
        handshake: Handshake,
    ) -> Result<()> {
        let mut params =
            ServerLoginParams::new(Arc::clone(&self.server_key), self.server_id.clone());
        params.use_security = self.config.security.encryption;
        params.compression_threshold = self.config.security.compression_threshold;
        params.client_handshake = Some(handshake);

        login::accept(
            reader,
            writer,
            &mut params,
            self.tokens.as_ref(),
            self.observer.as_ref(),
        )
        .await?;

        let player_name = params.player_name().unwrap_or_default().to_string();
        let protocol_version = params.protocol_version().unwrap_or_default();
        info!(player = %player_name, "client login complete");

        let (upstream_read, upstream_write) = self.connect_upstream().await?;
        let mut upstream_reader = FrameReader::new(upstream_read);
        let mut upstream_writer = FrameWriter::new(upstream_write);

        let mut connect_params = ConnectParams {
            protocol_version,
            server_host: self.config.upstream.host(),
            server_port: self.config.upstream.port,
            player_name: player_name.clone(),
            ..ConnectParams::default()
        };
        login::connect(
            &mut upstream_reader,
            &mut upstream_writer,
            &mut connect_params,
            self.tokens.as_ref(),
            self.observer.as_ref(),
        )
        .await?;

        info!(
            player = %player_name,
            upstream = %self.config.upstream_address(),
            "relay established"
        );

        // Two concurrent forwarding loops; either one ending (error or
        // peer disconnect) cancels the other and tears the session down.
        let observer = self.observer.as_ref();
        tokio::select! {
            result = pump(reader, &mut upstream_writer, Direction::ClientToUpstream, observer) => result,
            result = pump(&mut upstream_reader, writer, Direction::UpstreamToClient, observer) => result,
        }
    }

    /// Resolve and connect to the configured upstream.
    async fn connect_upstream(&self) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        let address = self.config.upstream_address();
        let connect_timeout = Duration::from_millis(self.config.upstream.connect_timeout_ms);
        debug!(address = %address, "resolving upstream");

        let attempt = timeout(connect_timeout, async {
            let addrs = lookup_host(&address).await?;
            let mut last_err = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
            }))
        })
        .await;

        match attempt {
            Ok(Ok(stream)) => {
                debug!("upstream connected");
                Ok(stream.into_split())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to connect upstream");
                Err(GatewayError::UpstreamUnavailable {
                    address,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!("upstream connection timeout");
                Err(GatewayError::UpstreamUnavailable {
                    address,
                    message: "connection timeout".to_string(),
                })
            }
        }
    }
}

/// One direction of the steady-state relay: read a frame, report it,
/// forward its exact bytes to the peer. Runs until an error or
/// disconnect ends the session.
async fn pump<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    direction: Direction,
    observer: &dyn WireObserver,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = reader.read_frame().await?;
        let packet_id = frame.packet_id().unwrap_or(-1);
        observer.on_frame(direction, packet_id, frame.len());
        debug!(%direction, packet_id, len = frame.len(), "relaying frame");
        writer.write_frame(frame.body()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_pump_forwards_frames_verbatim_in_order() {
        let (source, gateway_in) = tokio::io::duplex(4096);
        let (gateway_out, sink) = tokio::io::duplex(4096);

        let mut source_writer = FrameWriter::new(source);
        let mut reader = FrameReader::new(gateway_in);
        let mut writer = FrameWriter::new(gateway_out);
        let mut sink_reader = FrameReader::new(sink);

        let bodies: Vec<Bytes> = (0u8..5)
            .map(|i| Bytes::from(vec![i, 0xaa, 0xbb, i]))
            .collect();
        for body in &bodies {
            source_writer.write_frame(body).await.unwrap();
        }
        drop(source_writer); // EOF ends the pump

        let result = pump(
            &mut reader,
            &mut writer,
            Direction::ClientToUpstream,
            &NoopObserver,
        )
        .await;
        assert!(result.unwrap_err().is_benign_disconnect());

        for body in &bodies {
            let frame = sink_reader.read_frame().await.unwrap();
            assert_eq!(frame.body(), &body[..]);
        }
    }
}
