//! Mock upstream server for integration testing.
//!
//! A lightweight upstream that:
//! - Accepts gateway connections and runs the real server login exchange
//! - Records every frame received after login
//! - Sends frames pushed by the test toward the connected peer

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::debug;

use crate::codec::frame::{FrameReader, FrameWriter};
use crate::crypto::ServerKey;
use crate::login::{self, RandomTokens, ServerLoginParams};
use crate::observer::NoopObserver;
use crate::packet::NextState;

/// Mock upstream server for testing.
pub struct MockUpstream {
    address: String,
    use_security: bool,
    compression_threshold: Option<i32>,
    server_key: Arc<ServerKey>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    received: Arc<RwLock<Vec<Bytes>>>,
    logins: Arc<RwLock<Vec<String>>>,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    outbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
}

impl MockUpstream {
    /// Create a mock upstream bound to an ephemeral port, with login
    /// security disabled.
    #[must_use]
    pub fn new(server_key: Arc<ServerKey>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            address: "127.0.0.1:0".to_string(),
            use_security: false,
            compression_threshold: None,
            server_key,
            shutdown_tx: None,
            received: Arc::new(RwLock::new(Vec::new())),
            logins: Arc::new(RwLock::new(Vec::new())),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
        }
    }

    /// Require the key exchange on logins to this upstream.
    #[must_use]
    pub fn with_security(mut self, use_security: bool) -> Self {
        self.use_security = use_security;
        self
    }

    /// Send a set-compression packet during login.
    #[must_use]
    pub fn with_compression(mut self, threshold: i32) -> Self {
        self.compression_threshold = Some(threshold);
        self
    }

    /// Start the mock upstream.
    ///
    /// Returns the actual address it is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let actual_address = listener.local_addr()?.to_string();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let use_security = self.use_security;
        let compression_threshold = self.compression_threshold;
        let server_key = Arc::clone(&self.server_key);
        let received = Arc::clone(&self.received);
        let logins = Arc::clone(&self.logins);
        let outbound_rx = Arc::clone(&self.outbound_rx);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        let Ok((socket, _addr)) = result else { break };
                        let server_key = Arc::clone(&server_key);
                        let received = Arc::clone(&received);
                        let logins = Arc::clone(&logins);
                        let outbound_rx = Arc::clone(&outbound_rx);
                        let shutdown_rx = shutdown_tx.subscribe();

                        tokio::spawn(async move {
                            let _ = Self::handle_connection(
                                socket,
                                use_security,
                                compression_threshold,
                                server_key,
                                received,
                                logins,
                                outbound_rx,
                                shutdown_rx,
                            )
                            .await;
                        });
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Stop the mock upstream.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Queue a frame body to be sent to the connected peer.
    pub fn send_frame(&self, body: impl Into<Bytes>) {
        let _ = self.outbound_tx.send(body.into());
    }

    /// Frame bodies received after login, in arrival order.
    pub async fn received_frames(&self) -> Vec<Bytes> {
        self.received.read().await.clone()
    }

    /// Player names that completed a login against this upstream.
    pub async fn completed_logins(&self) -> Vec<String> {
        self.logins.read().await.clone()
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_connection(
        socket: tokio::net::TcpStream,
        use_security: bool,
        compression_threshold: Option<i32>,
        server_key: Arc<ServerKey>,
        received: Arc<RwLock<Vec<Bytes>>>,
        logins: Arc<RwLock<Vec<String>>>,
        outbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> crate::error::Result<()> {
        let (read_half, write_half) = socket.into_split();
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);
        let observer = NoopObserver;

        let handshake = login::read_handshake(&mut reader, &observer).await?;
        if handshake.next_state != NextState::Login {
            return Ok(());
        }

        let mut params =
            ServerLoginParams::new(server_key, "mockupstream0000".to_string());
        params.use_security = use_security;
        params.compression_threshold = compression_threshold;
        params.client_handshake = Some(handshake);

        login::accept(&mut reader, &mut writer, &mut params, &RandomTokens, &observer).await?;
        if let Some(name) = params.player_name() {
            logins.write().await.push(name.to_string());
        }
        debug!(player = ?params.player_name(), "mock upstream login complete");

        let mut outbound = outbound_rx.lock().await;
        loop {
            tokio::select! {
                frame = reader.read_frame() => {
                    let frame = frame?;
                    received.write().await.push(Bytes::copy_from_slice(frame.body()));
                }
                body = outbound.recv() => {
                    let Some(body) = body else { break };
                    writer.write_frame(&body).await?;
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        Ok(())
    }
}
