//! Test harness for integration testing of the gateway.
//!
//! Provides a complete test environment: a mock upstream, a running
//! gateway listener wired to it, and the addresses a test client needs.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::{
    GatewayConfig, ListenConfig, LoggingConfig, SecurityConfig, StatusConfig, UpstreamConfig,
};
use crate::crypto::ServerKey;
use crate::relay::GatewayListener;

use super::mock_upstream::MockUpstream;

/// A running gateway plus its mock upstream.
pub struct GatewayTestHarness {
    /// The mock upstream behind the gateway.
    pub upstream: MockUpstream,
    /// Address test clients connect to.
    pub gateway_addr: SocketAddr,
    /// The gateway configuration in effect.
    pub config: GatewayConfig,
    shutdown: broadcast::Sender<()>,
}

impl GatewayTestHarness {
    /// Start a harness with default settings (no encryption anywhere).
    pub async fn new() -> Self {
        TestHarnessBuilder::new().build().await
    }

    /// Builder for custom configurations.
    #[must_use]
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Stop the gateway and the mock upstream.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown.send(());
        self.upstream.stop();
    }
}

impl Drop for GatewayTestHarness {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`GatewayTestHarness`].
pub struct TestHarnessBuilder {
    client_encryption: bool,
    client_compression: Option<i32>,
    upstream_security: bool,
    upstream_compression: Option<i32>,
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarnessBuilder {
    /// All security and compression off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client_encryption: false,
            client_compression: None,
            upstream_security: false,
            upstream_compression: None,
        }
    }

    /// Run the key exchange on the client leg.
    #[must_use]
    pub fn client_encryption(mut self, on: bool) -> Self {
        self.client_encryption = on;
        self
    }

    /// Enable compression on the client leg.
    #[must_use]
    pub fn client_compression(mut self, threshold: i32) -> Self {
        self.client_compression = Some(threshold);
        self
    }

    /// Require the key exchange on the upstream leg.
    #[must_use]
    pub fn upstream_security(mut self, on: bool) -> Self {
        self.upstream_security = on;
        self
    }

    /// Have the upstream enable compression during login.
    #[must_use]
    pub fn upstream_compression(mut self, threshold: i32) -> Self {
        self.upstream_compression = Some(threshold);
        self
    }

    /// Start the mock upstream and the gateway.
    ///
    /// # Panics
    ///
    /// Panics if any component fails to start; this is test-only code.
    pub async fn build(self) -> GatewayTestHarness {
        // 512-bit keys keep the suite fast; production uses 1024.
        let upstream_key = Arc::new(ServerKey::generate(512).unwrap());
        let gateway_key = Arc::new(ServerKey::generate(512).unwrap());

        let mut upstream = MockUpstream::new(upstream_key).with_security(self.upstream_security);
        if let Some(threshold) = self.upstream_compression {
            upstream = upstream.with_compression(threshold);
        }
        let upstream_addr: SocketAddr = upstream
            .start()
            .await
            .expect("failed to start mock upstream")
            .parse()
            .unwrap();

        let config = GatewayConfig {
            listen: ListenConfig {
                address: "127.0.0.1:0".to_string(),
                max_connections: 16,
            },
            upstream: UpstreamConfig {
                host: upstream_addr.ip().to_string(),
                port: upstream_addr.port(),
                connect_timeout_ms: 2_000,
            },
            security: SecurityConfig {
                encryption: self.client_encryption,
                key_bits: 512,
                compression_threshold: self.client_compression,
            },
            status: StatusConfig::default(),
            logging: LoggingConfig::default(),
        };

        let listener = GatewayListener::with_key(config.clone(), gateway_key);
        let shutdown = listener.shutdown_handle();

        let socket = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind gateway");
        let gateway_addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.serve(socket).await;
        });

        GatewayTestHarness {
            upstream,
            gateway_addr,
            config,
            shutdown,
        }
    }
}
