//! In-process broker for protocol tests.
//!
//! Enabled for other crates by the `test-util` feature.

use crate::codec::{FieldTable, FieldValue};
use crate::frame::{Frame, FramePayload, FrameReader, FrameWriter, PROTOCOL_HEADER};
use crate::method::{BasicDeliver, Close, ConnectionStart, Method, Tune};
use crate::properties::{BasicProperties, ContentHeader};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

type BoxRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// Server side of a client connection, scripted by the test.
///
/// Every method panics when the client deviates from the script.
pub struct FakeBroker {
    reader: FrameReader<BoxRead>,
    writer: FrameWriter<BoxWrite>,
    credentials: Vec<u8>,
    vhost: String,
}

impl FakeBroker {
    /// Channel limit offered in connection.tune
    pub const CHANNEL_MAX: u16 = 2047;

    /// Read the protocol header, send start, read start-ok.
    async fn greet<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut read, write) = tokio::io::split(stream);
        let mut header = [0u8; 8];
        read.read_exact(&mut header).await.unwrap();
        assert_eq!(&header, PROTOCOL_HEADER);

        let mut reader = FrameReader::new(Box::new(read) as BoxRead);
        reader.set_frame_max(0);
        let mut broker = Self {
            reader,
            writer: FrameWriter::new(Box::new(write) as BoxWrite),
            credentials: Vec::new(),
            vhost: String::new(),
        };

        let mut server_properties = FieldTable::new();
        server_properties.insert("product".into(), FieldValue::text("FakeBroker"));
        broker
            .send(
                0,
                Method::ConnectionStart(ConnectionStart {
                    version_major: 0,
                    version_minor: 9,
                    server_properties,
                    mechanisms: b"AMQPLAIN PLAIN".to_vec(),
                    locales: b"en_US".to_vec(),
                }),
            )
            .await;

        let (_, Method::ConnectionStartOk(start_ok)) = broker.expect().await else {
            panic!("expected connection.start-ok");
        };
        broker.credentials = start_ok.response;
        broker
    }

    /// Complete a full handshake.
    pub async fn accept<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut broker = Self::greet(stream).await;
        broker
            .send(
                0,
                Method::ConnectionTune(Tune {
                    channel_max: Self::CHANNEL_MAX,
                    frame_max: 131_072,
                    heartbeat: 60,
                }),
            )
            .await;

        let (_, Method::ConnectionTuneOk(_)) = broker.expect().await else {
            panic!("expected connection.tune-ok");
        };
        let (_, Method::ConnectionOpen { virtual_host }) = broker.expect().await else {
            panic!("expected connection.open");
        };
        broker.vhost = virtual_host;
        broker.send(0, Method::ConnectionOpenOk).await;
        broker
    }

    /// Refuse the login with connection.close.
    pub async fn refuse<S>(stream: S, code: u16, text: &str)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut broker = Self::greet(stream).await;
        broker
            .send(
                0,
                Method::ConnectionClose(Close {
                    reply_code: code,
                    reply_text: text.to_string(),
                    class_id: 10,
                    method_id: 11,
                }),
            )
            .await;
        assert_eq!(broker.expect().await.1, Method::ConnectionCloseOk);
    }

    /// SASL response from start-ok.
    #[must_use]
    pub fn credentials(&self) -> &[u8] {
        &self.credentials
    }

    /// Virtual host from connection.open.
    #[must_use]
    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    /// Next method from the client, skipping heartbeats.
    pub async fn expect(&mut self) -> (u16, Method) {
        loop {
            let frame = self
                .reader
                .read_frame()
                .await
                .unwrap()
                .expect("client closed the socket");
            match frame.payload {
                FramePayload::Method(method) => return (frame.channel, method),
                FramePayload::Heartbeat => {}
                other => panic!("unexpected frame from client: {other:?}"),
            }
        }
    }

    /// Send a method frame.
    pub async fn send(&mut self, channel: u16, method: Method) {
        self.writer
            .write_frame(&Frame::method(channel, method))
            .await
            .unwrap();
    }

    /// Deliver a message, splitting the body over two frames.
    pub async fn deliver(
        &mut self,
        channel: u16,
        consumer_tag: &str,
        delivery_tag: u64,
        routing_key: &str,
        body: &[u8],
    ) {
        let mut frames = vec![
            Frame::method(
                channel,
                Method::BasicDeliver(BasicDeliver {
                    consumer_tag: consumer_tag.to_string(),
                    delivery_tag,
                    redelivered: false,
                    exchange: "amq.topic".to_string(),
                    routing_key: routing_key.to_string(),
                }),
            ),
            Frame {
                channel,
                payload: FramePayload::Header(ContentHeader {
                    class_id: 60,
                    body_size: body.len() as u64,
                    properties: BasicProperties::default(),
                }),
            },
        ];
        let (head, tail) = body.split_at(body.len() / 2);
        for chunk in [head, tail] {
            if !chunk.is_empty() {
                frames.push(Frame {
                    channel,
                    payload: FramePayload::Body(Bytes::copy_from_slice(chunk)),
                });
            }
        }
        self.writer.write_frames(&frames).await.unwrap();
    }

    /// Answer a connection.close.
    pub async fn serve_close(&mut self) {
        let (_, method) = self.expect().await;
        assert!(matches!(method, Method::ConnectionClose(_)));
        self.send(0, Method::ConnectionCloseOk).await;
    }
}

#[cfg(test)]
pub(crate) use internal::{open_link, Recorder};
