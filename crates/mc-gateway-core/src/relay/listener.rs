//! TCP listener for accepting client connections.
//!
//! The listener accepts connections and spawns a task for each one,
//! delegating to the connection handler for the protocol lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::crypto::ServerKey;
use crate::error::{ConfigResult, Result};
use crate::login::{generate_server_id, RandomTokens, TokenSource};
use crate::observer::{TracingObserver, WireObserver};

use super::connection::ConnectionHandler;

/// TCP listener that accepts client connections.
pub struct GatewayListener {
    config: Arc<GatewayConfig>,
    server_key: Arc<ServerKey>,
    server_id: String,
    shutdown_tx: broadcast::Sender<()>,
    active_connections: Arc<AtomicUsize>,
    connection_seq: AtomicUsize,
    observer: Arc<dyn WireObserver>,
    tokens: Arc<dyn TokenSource>,
}

impl GatewayListener {
    /// Create a new gateway listener, generating the server keypair and
    /// identity for this listening session.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn new(config: GatewayConfig) -> ConfigResult<Self> {
        let server_key = Arc::new(ServerKey::generate(config.security.key_bits)?);
        Ok(Self::with_key(config, server_key))
    }

    /// Create a listener around an existing keypair (used by tests to
    /// skip generation).
    #[must_use]
    pub fn with_key(config: GatewayConfig, server_key: Arc<ServerKey>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            server_key,
            server_id: generate_server_id(),
            shutdown_tx,
            active_connections: Arc::new(AtomicUsize::new(0)),
            connection_seq: AtomicUsize::new(0),
            observer: Arc::new(TracingObserver),
            tokens: Arc::new(RandomTokens),
        }
    }

    /// Replace the traffic observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WireObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the token source.
    #[must_use]
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Get a shutdown handle to signal the listener to stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get the current number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// The server identity string used in encryption requests.
    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Bind the configured address and run until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the listen address fails.
    #[instrument(skip(self), fields(address = %self.config.listen.address))]
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen.address).await?;
        info!(address = %self.config.listen.address, "gateway listening");
        self.serve(listener).await
    }

    /// Run the accept loop on an already-bound listener.
    ///
    /// # Errors
    ///
    /// Propagates no accept errors (they are logged and retried); only a
    /// shutdown ends the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let current = self.active_connections.load(Ordering::Relaxed);

                            if current >= self.config.listen.max_connections {
                                warn!(
                                    peer = %addr,
                                    active = current,
                                    max = self.config.listen.max_connections,
                                    "connection rejected: limit reached"
                                );
                                // Socket is dropped, closing the connection.
                                continue;
                            }

                            self.active_connections.fetch_add(1, Ordering::Relaxed);
                            let seq = self.connection_seq.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %addr, active = current + 1, "accepted connection");

                            let handler = ConnectionHandler::new(
                                Arc::clone(&self.config),
                                Arc::clone(&self.server_key),
                                self.server_id.clone(),
                                format!("conn-{seq}"),
                                self.shutdown_tx.subscribe(),
                                Arc::clone(&self.observer),
                                Arc::clone(&self.tokens),
                            );
                            let active_connections = Arc::clone(&self.active_connections);

                            tokio::spawn(async move {
                                if let Err(e) = handler.handle(socket).await {
                                    if e.is_benign_disconnect() {
                                        debug!(peer = %addr, reason = %e, "connection closed");
                                    } else {
                                        error!(peer = %addr, error = %e, "connection error");
                                    }
                                }
                                active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        let active = self.active_connections.load(Ordering::Relaxed);
        if active > 0 {
            info!(active, "connections still draining at shutdown");
        }

        Ok(())
    }
}
