//! Legacy (pre-framing) server-list ping.
//!
//! Old clients probe with a single unframed `0xFE` byte (optionally
//! followed by `0x01` and a plugin-message blob). The answer is a `0xFF`
//! kick-style packet: a UTF-16BE string of `\0`-separated fields. This
//! exchange is detected and answered before any length-prefixed framing
//! is attempted.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::codec::frame::{FrameReader, FrameWriter};
use crate::config::StatusConfig;
use crate::error::Result;

/// First byte of a legacy ping request.
pub const LEGACY_PING_LEAD: u8 = 0xfe;

/// Protocol version advertised in the legacy response.
const LEGACY_PROTOCOL_VERSION: &str = "127";

/// Version string advertised in the legacy response.
const LEGACY_VERSION_NAME: &str = "relay";

/// Answer a legacy ping directly and return; the caller closes the
/// connection.
///
/// # Errors
///
/// Fails on transport errors.
pub async fn answer_legacy_ping<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    status: &StatusConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Drain whatever the client sent; the request carries no information
    // the response depends on.
    let request = reader.read_raw(256).await?;
    debug!(len = request.len(), "legacy ping request");

    let max_players = status.max_players.to_string();
    let fields = [
        "\u{a7}1",
        LEGACY_PROTOCOL_VERSION,
        LEGACY_VERSION_NAME,
        status.motd.as_str(),
        "0",
        max_players.as_str(),
    ]
    .join("\0");

    let units: Vec<u16> = fields.encode_utf16().collect();
    let mut response = BytesMut::with_capacity(3 + units.len() * 2);
    response.put_u8(0xff);
    response.put_u16(units.len() as u16);
    for unit in units {
        response.put_u16(unit);
    }

    writer.write_raw(&response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_legacy_ping_response_shape() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (gateway_in, _a) = tokio::io::split(server);
        let (response_out, gateway_out) = tokio::io::duplex(1024);

        let mut reader = FrameReader::new(gateway_in);
        let mut writer = FrameWriter::new(gateway_out);

        client.write_all(&[0xfe, 0x01]).await.unwrap();

        let status = StatusConfig {
            motd: "A relay".to_string(),
            max_players: 20,
        };
        answer_legacy_ping(&mut reader, &mut writer, &status)
            .await
            .unwrap();

        let mut response = FrameReader::new(response_out);
        let raw = response.read_raw(512).await.unwrap();

        assert_eq!(raw[0], 0xff);
        let declared_units = u16::from(raw[1]) << 8 | u16::from(raw[2]);
        assert_eq!(raw.len(), 3 + declared_units as usize * 2);

        // Decode the UTF-16BE body and check the field layout.
        let units: Vec<u16> = raw[3..]
            .chunks_exact(2)
            .map(|c| u16::from(c[0]) << 8 | u16::from(c[1]))
            .collect();
        let text = String::from_utf16(&units).unwrap();
        let fields: Vec<&str> = text.split('\0').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "\u{a7}1");
        assert_eq!(fields[1], "127");
        assert_eq!(fields[3], "A relay");
        assert_eq!(fields[5], "20");
    }
}
