//! Login handshake state machines.
//!
//! One module holds both halves of the exchange: [`accept`] plays the
//! server toward a connecting client, [`connect`] plays the client toward
//! the upstream server. Both share the same expect/observe/derive
//! plumbing so the two protocol directions cannot drift apart.
//!
//! Steps are strictly sequential and abort on first failure; the terminal
//! error of a failed run is reported to the observer's failure sink. No
//! step is ever retried.

use std::sync::Arc;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use uuid::Uuid;

use crate::codec::frame::{FrameReader, FrameWriter};
use crate::crypto::{encrypt_with_public_der, ServerKey, SHARED_SECRET_LEN};
use crate::error::{GatewayError, Result};
use crate::observer::WireObserver;
use crate::packet::{
    expect_packet, EncryptionRequest, EncryptionResponse, Handshake, LoginClientbound,
    LoginStart, LoginSuccess, NextState, Packet, SetCompression,
};

/// Provider of the random material a login consumes: verify tokens,
/// shared secrets, and session identifiers. Injected so tests can run
/// the state machine deterministically.
pub trait TokenSource: Send + Sync {
    /// Fresh verify token for an encryption request.
    fn verify_token(&self) -> Vec<u8>;

    /// Fresh shared secret for an outbound key exchange.
    fn shared_secret(&self) -> [u8; SHARED_SECRET_LEN];

    /// Fresh session identifier.
    fn session_id(&self) -> Uuid;
}

/// Production token source backed by the thread RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokens;

impl TokenSource for RandomTokens {
    fn verify_token(&self) -> Vec<u8> {
        let mut token = vec![0u8; 4];
        rand::thread_rng().fill(&mut token[..]);
        token
    }

    fn shared_secret(&self) -> [u8; SHARED_SECRET_LEN] {
        rand::thread_rng().gen()
    }

    fn session_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Generate a 16-character server identity string for encryption
/// requests.
#[must_use]
pub fn generate_server_id() -> String {
    const CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Session-scoped record of a server-side login exchange.
///
/// Owned exclusively by one connection and mutated in place as each step
/// completes; dropped with the connection.
pub struct ServerLoginParams {
    /// Run the key exchange and encrypt the session.
    pub use_security: bool,
    /// Send a set-compression packet before login success.
    pub compression_threshold: Option<i32>,
    /// Server identity string echoed in the encryption request.
    pub server_id: String,
    /// The gateway's RSA keypair.
    pub server_key: Arc<ServerKey>,

    // Exchanged packets, recorded as the login progresses.
    pub client_handshake: Option<Handshake>,
    pub client_login_start: Option<LoginStart>,
    pub encryption_request: Option<EncryptionRequest>,
    pub encryption_response: Option<EncryptionResponse>,
    pub login_success: Option<LoginSuccess>,
    /// Shared secret derived from the key exchange.
    pub shared_secret: Option<Vec<u8>>,
}

impl ServerLoginParams {
    /// Create login parameters with security enabled.
    #[must_use]
    pub fn new(server_key: Arc<ServerKey>, server_id: String) -> Self {
        Self {
            use_security: true,
            compression_threshold: None,
            server_id,
            server_key,
            client_handshake: None,
            client_login_start: None,
            encryption_request: None,
            encryption_response: None,
            login_success: None,
            shared_secret: None,
        }
    }

    /// The player name from the login-start step, if reached.
    #[must_use]
    pub fn player_name(&self) -> Option<&str> {
        self.client_login_start.as_ref().map(|p| p.name.as_str())
    }

    /// The protocol version from the handshake step, if recorded.
    #[must_use]
    pub fn protocol_version(&self) -> Option<i32> {
        self.client_handshake.as_ref().map(|h| h.protocol_version)
    }
}

impl std::fmt::Debug for ServerLoginParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLoginParams")
            .field("use_security", &self.use_security)
            .field("server_id", &self.server_id)
            .field("player", &self.player_name())
            .field("secret_derived", &self.shared_secret.is_some())
            .finish_non_exhaustive()
    }
}

/// Session-scoped record of a client-side login against the upstream.
#[derive(Debug, Default)]
pub struct ConnectParams {
    /// Protocol version to present (the real client's).
    pub protocol_version: i32,
    /// Host the handshake names.
    pub server_host: String,
    /// Port the handshake names.
    pub server_port: u16,
    /// Player name to log in as (the real client's).
    pub player_name: String,

    // Recorded as the login progresses.
    pub encryption_request: Option<EncryptionRequest>,
    pub login_success: Option<LoginSuccess>,
    pub shared_secret: Option<Vec<u8>>,
    pub compression_threshold: Option<i32>,
}

/// Read one frame and parse it as the specific packet the current state
/// requires.
async fn expect_frame<P, R>(
    reader: &mut FrameReader<R>,
    observer: &dyn WireObserver,
) -> Result<P>
where
    P: Packet,
    R: AsyncRead + Unpin,
{
    let frame = reader.read_frame().await?;
    observer.on_receive(frame.body());
    expect_packet(&frame)
}

/// Encode and send one packet, reporting the bytes to the observer.
async fn send_packet<P, W>(
    writer: &mut FrameWriter<W>,
    packet: &P,
    observer: &dyn WireObserver,
) -> Result<()>
where
    P: Packet,
    W: AsyncWrite + Unpin,
{
    let body = packet.encode_frame();
    observer.on_transmit(&body);
    writer.write_frame(&body).await
}

/// Read and validate the opening handshake frame.
///
/// # Errors
///
/// Fails if the first frame is not a well-formed, valid handshake.
pub async fn read_handshake<R>(
    reader: &mut FrameReader<R>,
    observer: &dyn WireObserver,
) -> Result<Handshake>
where
    R: AsyncRead + Unpin,
{
    let result = match expect_frame::<Handshake, R>(reader, observer).await {
        Ok(handshake) => handshake.validate().map(|()| handshake),
        Err(e) => Err(e),
    };
    match result {
        Ok(handshake) => Ok(handshake),
        Err(e) => {
            observer.on_failure(&e);
            Err(e)
        }
    }
}

/// Run the server half of the login exchange, from login-start through
/// login-success. The handshake has already been consumed (and stored in
/// `params`) by the connection lifecycle.
///
/// # Errors
///
/// Any step failure halts the machine, reaches the observer's failure
/// sink, and is returned. Nothing is retried.
pub async fn accept<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    params: &mut ServerLoginParams,
    tokens: &dyn TokenSource,
    observer: &dyn WireObserver,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match accept_steps(reader, writer, params, tokens, observer).await {
        Ok(()) => Ok(()),
        Err(e) => {
            observer.on_failure(&e);
            Err(e)
        }
    }
}

async fn accept_steps<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    params: &mut ServerLoginParams,
    tokens: &dyn TokenSource,
    observer: &dyn WireObserver,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let login_start: LoginStart = expect_frame(reader, observer).await?;
    let username = login_start.name.clone();
    debug!(player = %username, "login start");
    params.client_login_start = Some(login_start);

    if params.use_security {
        let verify_token = tokens.verify_token();
        let request = EncryptionRequest {
            server_id: params.server_id.clone(),
            public_key: params.server_key.public_key_der().to_vec(),
            verify_token: verify_token.clone(),
        };
        send_packet(writer, &request, observer).await?;
        params.encryption_request = Some(request);

        let response: EncryptionResponse = expect_frame(reader, observer).await?;
        let secret = params.server_key.decrypt(&response.shared_secret)?;
        let echoed_token = params.server_key.decrypt(&response.verify_token)?;
        params.encryption_response = Some(response);

        if echoed_token != verify_token {
            return Err(GatewayError::VerifyTokenMismatch);
        }

        // Every byte from here on, in both directions, goes through the
        // session cipher keyed by the derived secret.
        reader.enable_encryption(&secret)?;
        writer.enable_encryption(&secret)?;
        params.shared_secret = Some(secret);
        debug!(player = %username, "session cipher installed");
    }

    if let Some(threshold) = params.compression_threshold {
        send_packet(writer, &SetCompression { threshold }, observer).await?;
        writer.enable_compression(threshold);
        reader.enable_compression();
    }

    let success = LoginSuccess {
        uuid: tokens.session_id().to_string(),
        username,
    };
    send_packet(writer, &success, observer).await?;
    params.login_success = Some(success);
    Ok(())
}

/// Run the client half of the login exchange against the upstream:
/// handshake and login-start out, then clientbound login packets until
/// login-success.
///
/// # Errors
///
/// Any step failure halts the machine, reaches the observer's failure
/// sink, and is returned. An upstream disconnect packet surfaces as
/// [`GatewayError::UpstreamDisconnect`].
pub async fn connect<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    params: &mut ConnectParams,
    tokens: &dyn TokenSource,
    observer: &dyn WireObserver,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match connect_steps(reader, writer, params, tokens, observer).await {
        Ok(()) => Ok(()),
        Err(e) => {
            observer.on_failure(&e);
            Err(e)
        }
    }
}

async fn connect_steps<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    params: &mut ConnectParams,
    tokens: &dyn TokenSource,
    observer: &dyn WireObserver,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let handshake = Handshake {
        protocol_version: params.protocol_version,
        server_address: params.server_host.clone(),
        server_port: params.server_port,
        next_state: NextState::Login,
    };
    send_packet(writer, &handshake, observer).await?;
    send_packet(
        writer,
        &LoginStart {
            name: params.player_name.clone(),
        },
        observer,
    )
    .await?;

    loop {
        let frame = reader.read_frame().await?;
        observer.on_receive(frame.body());
        match LoginClientbound::decode(frame.body())? {
            LoginClientbound::SetCompression(p) => {
                // A negative threshold means the upstream turned
                // compression off.
                if p.threshold >= 0 {
                    debug!(threshold = p.threshold, "upstream enabled compression");
                    reader.enable_compression();
                    writer.enable_compression(p.threshold);
                    params.compression_threshold = Some(p.threshold);
                }
            }
            LoginClientbound::EncryptionRequest(request) => {
                let secret = tokens.shared_secret();
                let response = EncryptionResponse {
                    shared_secret: encrypt_with_public_der(&request.public_key, &secret)?,
                    verify_token: encrypt_with_public_der(
                        &request.public_key,
                        &request.verify_token,
                    )?,
                };
                send_packet(writer, &response, observer).await?;
                // The response itself goes out in the clear; everything
                // after it is encrypted.
                writer.enable_encryption(&secret)?;
                reader.enable_encryption(&secret)?;
                params.shared_secret = Some(secret.to_vec());
                params.encryption_request = Some(request);
                debug!("session cipher installed toward upstream");
            }
            LoginClientbound::LoginSuccess(success) => {
                debug!(username = %success.username, uuid = %success.uuid, "upstream accepted login");
                params.login_success = Some(success);
                return Ok(());
            }
            LoginClientbound::Disconnect(p) => {
                return Err(GatewayError::UpstreamDisconnect(p.reason));
            }
            LoginClientbound::Empty => unreachable!("decode never yields the empty sentinel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::observer::NoopObserver;
    use crate::packet::LoginDisconnect;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic token source for scripted exchanges.
    struct FixedTokens;

    impl TokenSource for FixedTokens {
        fn verify_token(&self) -> Vec<u8> {
            vec![0xde, 0xad, 0xbe, 0xef]
        }

        fn shared_secret(&self) -> [u8; SHARED_SECRET_LEN] {
            [0x42; SHARED_SECRET_LEN]
        }

        fn session_id(&self) -> Uuid {
            Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0)
        }
    }

    #[derive(Default)]
    struct FailureCounter(AtomicUsize);

    impl WireObserver for FailureCounter {
        fn on_failure(&self, _error: &GatewayError) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn test_key() -> Arc<ServerKey> {
        Arc::new(ServerKey::generate(512).unwrap())
    }

    fn params_with(key: Arc<ServerKey>, use_security: bool) -> ServerLoginParams {
        let mut params = ServerLoginParams::new(key, "testserverid0000".to_string());
        params.use_security = use_security;
        params
    }

    #[tokio::test]
    async fn test_accept_without_security() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut params = params_with(test_key(), false);

        let client_task = tokio::spawn(async move {
            let mut writer = FrameWriter::new(client_write);
            let mut reader = FrameReader::new(client_read);
            writer
                .write_frame(&LoginStart {
                    name: "Alice".to_string(),
                }
                .encode_frame())
                .await
                .unwrap();

            // The first clientbound frame must be login success: no
            // encryption request when security is off.
            let frame = reader.read_frame().await.unwrap();
            let LoginClientbound::LoginSuccess(success) =
                LoginClientbound::decode(frame.body()).unwrap()
            else {
                panic!("expected login success");
            };
            success
        });

        let mut reader = FrameReader::new(server_read);
        let mut writer = FrameWriter::new(server_write);
        accept(&mut reader, &mut writer, &mut params, &FixedTokens, &NoopObserver)
            .await
            .unwrap();

        let success = client_task.await.unwrap();
        assert_eq!(success.username, "Alice");
        assert_eq!(success.uuid, FixedTokens.session_id().to_string());
        assert!(params.shared_secret.is_none());
        assert_eq!(params.player_name(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_accept_and_connect_derive_same_secret() {
        // The two halves of this module run against each other; the
        // secret derived on the server side must equal the one the
        // client generated, and the exchange must finish encrypted.
        let key = test_key();
        let (client, server) = tokio::io::duplex(8192);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut server_params = params_with(Arc::clone(&key), true);
        server_params.compression_threshold = Some(64);

        let client_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(client_read);
            let mut writer = FrameWriter::new(client_write);
            let mut params = ConnectParams {
                protocol_version: 578,
                server_host: "gateway.test".to_string(),
                server_port: 25565,
                player_name: "Alice".to_string(),
                ..ConnectParams::default()
            };
            connect(&mut reader, &mut writer, &mut params, &FixedTokens, &NoopObserver)
                .await
                .unwrap();
            params
        });

        let mut reader = FrameReader::new(server_read);
        let mut writer = FrameWriter::new(server_write);
        let observer = NoopObserver;

        let handshake = read_handshake(&mut reader, &observer).await.unwrap();
        assert_eq!(handshake.protocol_version, 578);
        assert_eq!(handshake.next_state, NextState::Login);
        server_params.client_handshake = Some(handshake);

        accept(&mut reader, &mut writer, &mut server_params, &FixedTokens, &observer)
            .await
            .unwrap();

        let client_params = client_task.await.unwrap();
        assert_eq!(
            server_params.shared_secret.as_deref(),
            Some(&FixedTokens.shared_secret()[..])
        );
        assert_eq!(
            client_params.shared_secret,
            server_params.shared_secret
        );
        assert_eq!(client_params.compression_threshold, Some(64));
        assert_eq!(
            client_params.login_success.unwrap().username,
            "Alice"
        );
    }

    #[tokio::test]
    async fn test_verify_token_mismatch_aborts() {
        let key = test_key();
        let (client, server) = tokio::io::duplex(8192);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut params = params_with(Arc::clone(&key), true);

        let client_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(client_read);
            let mut writer = FrameWriter::new(client_write);
            writer
                .write_frame(&LoginStart {
                    name: "Mallory".to_string(),
                }
                .encode_frame())
                .await
                .unwrap();

            let frame = reader.read_frame().await.unwrap();
            let LoginClientbound::EncryptionRequest(request) =
                LoginClientbound::decode(frame.body()).unwrap()
            else {
                panic!("expected encryption request");
            };

            // Echo the WRONG token.
            let secret = [0x42u8; SHARED_SECRET_LEN];
            let response = EncryptionResponse {
                shared_secret: encrypt_with_public_der(&request.public_key, &secret).unwrap(),
                verify_token: encrypt_with_public_der(&request.public_key, b"nope").unwrap(),
            };
            writer.write_frame(&response.encode_frame()).await.unwrap();

            // The session must never reach login success.
            let result = reader.read_frame().await;
            assert!(result.is_err(), "server must close without login success");
        });

        let mut reader = FrameReader::new(server_read);
        let mut writer = FrameWriter::new(server_write);
        let observer = FailureCounter::default();
        let result = accept(&mut reader, &mut writer, &mut params, &FixedTokens, &observer).await;

        assert!(matches!(result, Err(GatewayError::VerifyTokenMismatch)));
        assert_eq!(observer.0.load(Ordering::Relaxed), 1);
        assert!(params.login_success.is_none());

        drop(reader);
        drop(writer);
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_ordering_enforced() {
        // An encryption response before any handshake is an ordering
        // violation, reported as UnexpectedPacket rather than a crash.
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer
            .write_frame(
                &EncryptionResponse {
                    shared_secret: vec![0; 8],
                    verify_token: vec![0; 8],
                }
                .encode_frame(),
            )
            .await
            .unwrap();

        let result = read_handshake(&mut reader, &NoopObserver).await;
        assert!(matches!(
            result,
            Err(GatewayError::UnexpectedPacket {
                expected: 0x00,
                actual: 0x01,
            })
        ));
    }

    #[tokio::test]
    async fn test_login_start_before_handshake_fails_cleanly() {
        // Login-start shares the handshake's wire ID, so it parses as a
        // handshake and dies on the malformed fields, not on a panic.
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer
            .write_frame(
                &LoginStart {
                    name: "Alice".to_string(),
                }
                .encode_frame(),
            )
            .await
            .unwrap();

        let result = read_handshake(&mut reader, &NoopObserver).await;
        assert!(result.is_err());
        assert!(!matches!(
            result,
            Err(GatewayError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_surfaces_upstream_disconnect() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let server_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read);
            let mut writer = FrameWriter::new(server_write);
            // handshake + login start from the gateway, then refuse
            reader.read_frame().await.unwrap();
            reader.read_frame().await.unwrap();
            writer
                .write_frame(
                    &LoginDisconnect {
                        reason: "server full".to_string(),
                    }
                    .encode_frame(),
                )
                .await
                .unwrap();
        });

        let mut reader = FrameReader::new(client_read);
        let mut writer = FrameWriter::new(client_write);
        let mut params = ConnectParams {
            protocol_version: 578,
            server_host: "up".to_string(),
            server_port: 25565,
            player_name: "Alice".to_string(),
            ..ConnectParams::default()
        };

        let result =
            connect(&mut reader, &mut writer, &mut params, &FixedTokens, &NoopObserver).await;
        assert!(matches!(
            result,
            Err(GatewayError::UpstreamDisconnect(reason)) if reason == "server full"
        ));
        server_task.await.unwrap();
    }

    #[test]
    fn test_generate_server_id_shape() {
        let id = generate_server_id();
        assert_eq!(id.len(), 16);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_params_accessors() {
        let mut params = params_with(test_key(), true);
        assert_eq!(params.player_name(), None);
        assert_eq!(params.protocol_version(), None);
        params.client_handshake = Some(Handshake {
            protocol_version: 578,
            server_address: "h".to_string(),
            server_port: 1,
            next_state: NextState::Login,
        });
        assert_eq!(params.protocol_version(), Some(578));
    }

    #[test]
    fn test_incomplete_packet_body_is_malformed_not_suspension() {
        // Inside a complete frame, running out of field bytes is a
        // malformed packet: the codec error carries Incomplete but the
        // frame layer never sees it.
        let mut body = bytes::BytesMut::new();
        crate::codec::put_var_i32(&mut body, 0x01);
        crate::codec::put_var_i32(&mut body, 16); // declares 16 secret bytes
        body.extend_from_slice(&[0u8; 4]); // provides 4

        let frame = crate::codec::frame::Frame::new(body.freeze());
        let result: Result<EncryptionResponse> = expect_packet(&frame);
        assert!(matches!(
            result,
            Err(GatewayError::Codec(CodecError::Incomplete))
        ));
    }
}
