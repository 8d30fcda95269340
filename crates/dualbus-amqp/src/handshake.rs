//! Connection negotiation.

use crate::codec::{FieldTable, FieldValue};
use crate::error::ProtocolError;
use crate::frame::{Frame, FramePayload, FrameReader, FrameWriter};
use crate::method::{Close, ConnectionStartOk, Method, Tune};
use crate::params::ConnectionParams;
use tokio::io::{AsyncRead, AsyncWrite};

const PLAIN: &str = "PLAIN";

/// Negotiate a connection up to connection.open-ok.
///
/// Returns the tuning both sides agreed on.
pub(crate) async fn handshake<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    params: &ConnectionParams,
) -> Result<Tune, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_protocol_header().await?;

    let Method::ConnectionStart(start) = next_method(reader, writer).await? else {
        return Err(ProtocolError::Handshake(
            "expected connection.start".to_string(),
        ));
    };
    let mechanisms = String::from_utf8_lossy(&start.mechanisms);
    if !mechanisms.split_whitespace().any(|m| m == PLAIN) {
        return Err(ProtocolError::Handshake(format!(
            "broker does not offer PLAIN authentication (offers: {mechanisms})"
        )));
    }
    tracing::debug!(
        version = %format!("{}.{}", start.version_major, start.version_minor),
        product = start
            .server_properties
            .get("product")
            .and_then(FieldValue::as_str)
            .unwrap_or("unknown"),
        "Received connection.start"
    );

    writer
        .write_frame(&Frame::method(
            0,
            Method::ConnectionStartOk(ConnectionStartOk {
                client_properties: client_properties(),
                mechanism: PLAIN.to_string(),
                response: plain_response(&params.username, &params.password),
                locale: "en_US".to_string(),
            }),
        ))
        .await?;

    let Method::ConnectionTune(offered) = next_method(reader, writer).await? else {
        return Err(ProtocolError::Handshake(
            "expected connection.tune".to_string(),
        ));
    };
    let tune = Tune {
        channel_max: negotiate(params.channel_max, offered.channel_max),
        frame_max: negotiate(params.frame_max, offered.frame_max),
        heartbeat: negotiate(params.heartbeat, offered.heartbeat),
    };
    writer
        .write_frames(&[
            Frame::method(0, Method::ConnectionTuneOk(tune)),
            Frame::method(
                0,
                Method::ConnectionOpen {
                    virtual_host: params.vhost.clone(),
                },
            ),
        ])
        .await?;
    reader.set_frame_max(tune.frame_max);

    let Method::ConnectionOpenOk = next_method(reader, writer).await? else {
        return Err(ProtocolError::Handshake(
            "expected connection.open-ok".to_string(),
        ));
    };

    tracing::debug!(
        channel_max = tune.channel_max,
        frame_max = tune.frame_max,
        heartbeat = tune.heartbeat,
        "Connection negotiated"
    );
    Ok(tune)
}

/// Next method on channel 0, skipping heartbeats. A connection.close from
/// the broker is acknowledged and turned into an error.
async fn next_method<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<Method, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = reader
            .read_frame()
            .await?
            .ok_or_else(|| ProtocolError::Handshake("broker closed the socket".to_string()))?;
        match frame.payload {
            FramePayload::Heartbeat => {}
            FramePayload::Method(Method::ConnectionClose(Close {
                reply_code,
                reply_text,
                ..
            })) => {
                let _ = writer
                    .write_frame(&Frame::method(0, Method::ConnectionCloseOk))
                    .await;
                return Err(ProtocolError::ConnectionClosed {
                    code: reply_code,
                    text: reply_text,
                });
            }
            FramePayload::Method(method) if frame.channel == 0 => return Ok(method),
            other => {
                return Err(ProtocolError::Handshake(format!(
                    "unexpected frame on channel {}: {other:?}",
                    frame.channel
                )))
            }
        }
    }
}

/// 0 means "no preference" on either side.
fn negotiate<T: Copy + Ord + Default>(client: T, server: T) -> T {
    let zero = T::default();
    if client == zero {
        server
    } else if server == zero {
        client
    } else {
        client.min(server)
    }
}

fn plain_response(username: &str, password: &str) -> Vec<u8> {
    let mut response = Vec::with_capacity(username.len() + password.len() + 2);
    response.push(0);
    response.extend_from_slice(username.as_bytes());
    response.push(0);
    response.extend_from_slice(password.as_bytes());
    response
}

fn client_properties() -> FieldTable {
    let mut capabilities = FieldTable::new();
    capabilities.insert("consumer_cancel_notify".into(), FieldValue::Bool(true));
    capabilities.insert("basic.nack".into(), FieldValue::Bool(true));
    capabilities.insert("connection.blocked".into(), FieldValue::Bool(false));

    let mut properties = FieldTable::new();
    properties.insert("product".into(), FieldValue::text(env!("CARGO_PKG_NAME")));
    properties.insert("version".into(), FieldValue::text(env!("CARGO_PKG_VERSION")));
    properties.insert("platform".into(), FieldValue::text("Rust"));
    properties.insert("capabilities".into(), FieldValue::Table(capabilities));
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBroker;

    #[test]
    fn negotiation_takes_smaller_non_zero() {
        assert_eq!(negotiate(60u16, 30), 30);
        assert_eq!(negotiate(0u16, 30), 30);
        assert_eq!(negotiate(60u16, 0), 60);
        assert_eq!(negotiate(0u32, 0), 0);
    }

    #[test]
    fn plain_response_layout() {
        assert_eq!(plain_response("guest", "pw"), b"\0guest\0pw".to_vec());
    }

    #[tokio::test]
    async fn handshake_against_fake_broker() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(client);
        let mut reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);
        let params = ConnectionParams {
            heartbeat: 10,
            ..ConnectionParams::default()
        };

        let (tune, broker) = tokio::join!(
            handshake(&mut reader, &mut writer, &params),
            FakeBroker::accept(server)
        );

        let tune = tune.unwrap();
        assert_eq!(tune.heartbeat, 10);
        assert_eq!(tune.channel_max, FakeBroker::CHANNEL_MAX);
        assert_eq!(broker.credentials(), b"\0guest\0guest");
        assert_eq!(broker.vhost(), "/");
    }

    #[tokio::test]
    async fn handshake_surfaces_broker_refusal() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(client);
        let mut reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);
        let params = ConnectionParams::default();

        let (result, ()) = tokio::join!(
            handshake(&mut reader, &mut writer, &params),
            FakeBroker::refuse(server, 403, "ACCESS_REFUSED")
        );

        assert!(matches!(
            result,
            Err(ProtocolError::ConnectionClosed { code: 403, .. })
        ));
    }
}
