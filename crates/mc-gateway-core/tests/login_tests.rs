//! End-to-end login scenarios against a running gateway with a mock
//! upstream behind it.

use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use mc_gateway_core::codec::frame::{FrameReader, FrameWriter};
use mc_gateway_core::login::{self, ConnectParams, RandomTokens};
use mc_gateway_core::observer::NoopObserver;
use mc_gateway_core::packet::{
    EncryptionResponse, Handshake, LoginClientbound, LoginStart, NextState, Packet,
};
use mc_gateway_core::testing::GatewayTestHarness;

async fn connect_framed(
    addr: std::net::SocketAddr,
) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    (FrameReader::new(read_half), FrameWriter::new(write_half))
}

/// Poll until `f` yields `Some`, or panic after a few seconds.
async fn eventually<T, F, Fut>(mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..200 {
        if let Some(value) = f().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

/// Scenario: login with security disabled. The gateway must answer a
/// handshake + login-start immediately with login-success for the same
/// player name and a freshly generated UUID, with no encryption request.
#[tokio::test]
async fn test_login_without_security() {
    let harness = GatewayTestHarness::new().await;
    let (mut reader, mut writer) = connect_framed(harness.gateway_addr).await;

    let handshake = Handshake {
        protocol_version: 578,
        server_address: "localhost".to_string(),
        server_port: harness.gateway_addr.port(),
        next_state: NextState::Login,
    };
    writer.write_frame(&handshake.encode_frame()).await.unwrap();
    writer
        .write_frame(
            &LoginStart {
                name: "Alice".to_string(),
            }
            .encode_frame(),
        )
        .await
        .unwrap();

    // The very first clientbound frame is login success: no
    // encryption request was interposed.
    let frame = reader.read_frame().await.unwrap();
    let LoginClientbound::LoginSuccess(success) =
        LoginClientbound::decode(frame.body()).unwrap()
    else {
        panic!("expected login success as the first clientbound packet");
    };
    assert_eq!(success.username, "Alice");
    uuid::Uuid::parse_str(&success.uuid).expect("uuid must parse");

    // The gateway replayed the login upstream on the client's behalf.
    let upstream = &harness.upstream;
    let logins = eventually(|| async {
        let logins = upstream.completed_logins().await;
        (!logins.is_empty()).then_some(logins)
    })
    .await;
    assert_eq!(logins, vec!["Alice".to_string()]);
}

/// Each login mints its own session identifier.
#[tokio::test]
async fn test_login_uuids_are_fresh_per_session() {
    let harness = GatewayTestHarness::new().await;

    let mut uuids = Vec::new();
    for _ in 0..2 {
        let (mut reader, mut writer) = connect_framed(harness.gateway_addr).await;
        writer
            .write_frame(
                &Handshake {
                    protocol_version: 578,
                    server_address: "localhost".to_string(),
                    server_port: 25565,
                    next_state: NextState::Login,
                }
                .encode_frame(),
            )
            .await
            .unwrap();
        writer
            .write_frame(
                &LoginStart {
                    name: "Alice".to_string(),
                }
                .encode_frame(),
            )
            .await
            .unwrap();
        let frame = reader.read_frame().await.unwrap();
        let LoginClientbound::LoginSuccess(success) =
            LoginClientbound::decode(frame.body()).unwrap()
        else {
            panic!("expected login success");
        };
        uuids.push(success.uuid);
    }
    assert_ne!(uuids[0], uuids[1]);
}

/// Scenario: login with security enabled. The client answers the
/// encryption request, both sides derive the same secret, and the
/// session continues encrypted through login success and beyond.
#[tokio::test]
async fn test_login_with_security() {
    let harness = GatewayTestHarness::builder()
        .client_encryption(true)
        .build()
        .await;
    let (mut reader, mut writer) = connect_framed(harness.gateway_addr).await;

    // The client half of the exchange is the same state machine the
    // gateway runs against the upstream.
    let mut params = ConnectParams {
        protocol_version: 578,
        server_host: "localhost".to_string(),
        server_port: harness.gateway_addr.port(),
        player_name: "Bob".to_string(),
        ..ConnectParams::default()
    };
    login::connect(&mut reader, &mut writer, &mut params, &RandomTokens, &NoopObserver)
        .await
        .unwrap();

    // The key exchange happened and produced a session cipher.
    assert!(params.shared_secret.is_some());
    let request = params.encryption_request.as_ref().unwrap();
    assert_eq!(request.server_id.len(), 16);
    assert_eq!(request.verify_token.len(), 4);
    assert!(!request.public_key.is_empty());

    let success = params.login_success.as_ref().unwrap();
    assert_eq!(success.username, "Bob");
    uuid::Uuid::parse_str(&success.uuid).expect("uuid must parse");

    // Frames written after login success travel through the installed
    // cipher and still arrive upstream byte-identical.
    let probe = [0x10u8, 0x01, 0x02, 0x03];
    writer.write_frame(&probe).await.unwrap();

    let upstream = &harness.upstream;
    let frames = eventually(|| async {
        let frames = upstream.received_frames().await;
        (!frames.is_empty()).then_some(frames)
    })
    .await;
    assert_eq!(&frames[0][..], &probe[..]);
}

/// An encryption response sent before any handshake is an ordering
/// violation; the gateway closes the connection without a login success.
#[tokio::test]
async fn test_out_of_order_login_packet_closes_connection() {
    let harness = GatewayTestHarness::new().await;
    let (mut reader, mut writer) = connect_framed(harness.gateway_addr).await;

    writer
        .write_frame(
            &EncryptionResponse {
                shared_secret: vec![0u8; 16],
                verify_token: vec![0u8; 4],
            }
            .encode_frame(),
        )
        .await
        .unwrap();

    let result = reader.read_frame().await;
    assert!(result.is_err(), "gateway must close without responding");
}

/// A failed upstream connect ends the client session after its login;
/// nothing is retried.
#[tokio::test]
async fn test_unreachable_upstream_ends_session() {
    use mc_gateway_core::config::{
        GatewayConfig, ListenConfig, LoggingConfig, SecurityConfig, StatusConfig, UpstreamConfig,
    };
    use mc_gateway_core::crypto::ServerKey;
    use mc_gateway_core::relay::GatewayListener;
    use std::sync::Arc;

    let config = GatewayConfig {
        listen: ListenConfig {
            address: "127.0.0.1:0".to_string(),
            max_connections: 4,
        },
        upstream: UpstreamConfig {
            // Nothing listens here.
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_ms: 500,
        },
        security: SecurityConfig {
            encryption: false,
            key_bits: 512,
            compression_threshold: None,
        },
        status: StatusConfig::default(),
        logging: LoggingConfig::default(),
    };

    let key = Arc::new(ServerKey::generate(512).unwrap());
    let listener = GatewayListener::with_key(config, key);
    let shutdown = listener.shutdown_handle();
    let socket = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.serve(socket).await;
    });

    let (mut reader, mut writer) = connect_framed(addr).await;
    writer
        .write_frame(
            &Handshake {
                protocol_version: 578,
                server_address: "localhost".to_string(),
                server_port: addr.port(),
                next_state: NextState::Login,
            }
            .encode_frame(),
        )
        .await
        .unwrap();
    writer
        .write_frame(
            &LoginStart {
                name: "Alice".to_string(),
            }
            .encode_frame(),
        )
        .await
        .unwrap();

    // The client-leg login completes before the upstream connect is
    // attempted, so a login success arrives first...
    let frame = reader.read_frame().await.unwrap();
    assert!(matches!(
        LoginClientbound::decode(frame.body()).unwrap(),
        LoginClientbound::LoginSuccess(_)
    ));

    // ...and then the session ends because the upstream is unreachable.
    let result = reader.read_frame().await;
    assert!(result.is_err());

    let _ = shutdown.send(());
}
