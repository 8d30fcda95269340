//! Frames and the buffered frame reader/writer.
//!
//! A frame is `type:u8 channel:u16 size:u32 payload[size] 0xCE`. Decoding
//! is incremental: [`Frame::decode`] returns `Ok(None)` until a whole
//! frame is buffered.

use crate::error::{CodecError, ProtocolError};
use crate::method::Method;
use crate::properties::ContentHeader;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sent by the client before anything else.
pub const PROTOCOL_HEADER: &[u8; 8] = b"AMQP\x00\x00\x09\x01";

/// Method frame type.
pub const FRAME_METHOD: u8 = 1;
/// Content header frame type.
pub const FRAME_HEADER: u8 = 2;
/// Content body frame type.
pub const FRAME_BODY: u8 = 3;
/// Heartbeat frame type.
pub const FRAME_HEARTBEAT: u8 = 8;
/// Trailing octet of every frame.
pub const FRAME_END: u8 = 0xCE;

/// Type, channel and size.
const HEADER_LEN: usize = 7;
/// Frame-max before tuning, per the protocol minimum.
pub const INITIAL_FRAME_MAX: usize = 4096;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel the frame belongs to (0 for the connection)
    pub channel: u16,
    /// Frame contents
    pub payload: FramePayload,
}

/// Contents of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// A method
    Method(Method),
    /// Content header following a content-bearing method
    Header(ContentHeader),
    /// A chunk of message body
    Body(Bytes),
    /// Keep-alive
    Heartbeat,
}

impl Frame {
    /// A method frame.
    #[must_use]
    pub fn method(channel: u16, method: Method) -> Self {
        Self {
            channel,
            payload: FramePayload::Method(method),
        }
    }

    /// A heartbeat frame on channel 0.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self {
            channel: 0,
            payload: FramePayload::Heartbeat,
        }
    }

    /// Append the encoded frame to `buf`.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be encoded.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let mut payload = BytesMut::new();
        let kind = match &self.payload {
            FramePayload::Method(method) => {
                method.encode(&mut payload)?;
                FRAME_METHOD
            }
            FramePayload::Header(header) => {
                header.encode(&mut payload)?;
                FRAME_HEADER
            }
            FramePayload::Body(body) => {
                payload.put_slice(body);
                FRAME_BODY
            }
            FramePayload::Heartbeat => FRAME_HEARTBEAT,
        };

        let size =
            u32::try_from(payload.len()).map_err(|_| CodecError::ValueTooLong(payload.len()))?;
        buf.reserve(HEADER_LEN + payload.len() + 1);
        buf.put_u8(kind);
        buf.put_u16(self.channel);
        buf.put_u32(size);
        buf.put_slice(&payload);
        buf.put_u8(FRAME_END);
        Ok(())
    }

    /// Take one frame off the front of `buf` if it is complete.
    ///
    /// `frame_max` of 0 disables the size check.
    ///
    /// # Errors
    ///
    /// Returns error on an unknown frame type, a bad frame end, an
    /// oversized frame or an undecodable payload.
    pub fn decode(buf: &mut BytesMut, frame_max: usize) -> Result<Option<Self>, CodecError> {
        if buf.starts_with(b"AMQP") {
            return Err(CodecError::ProtocolMismatch);
        }
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = buf[0];
        let channel = u16::from_be_bytes([buf[1], buf[2]]);
        let size = u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]) as usize;
        let total = HEADER_LEN + size + 1;

        if !matches!(kind, FRAME_METHOD | FRAME_HEADER | FRAME_BODY | FRAME_HEARTBEAT) {
            return Err(CodecError::UnknownFrameType(kind));
        }
        if frame_max > 0 && total > frame_max {
            return Err(CodecError::FrameTooLarge {
                size: total,
                max: frame_max,
            });
        }
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }
        if buf[total - 1] != FRAME_END {
            return Err(CodecError::BadFrameEnd(buf[total - 1]));
        }

        let mut raw = buf.split_to(total).freeze();
        raw.advance(HEADER_LEN);
        let body = raw.slice(..size);

        let payload = match kind {
            FRAME_METHOD => FramePayload::Method(Method::decode(&body)?),
            FRAME_HEADER => FramePayload::Header(ContentHeader::decode(&body)?),
            FRAME_BODY => FramePayload::Body(body),
            _ => FramePayload::Heartbeat,
        };
        Ok(Some(Self { channel, payload }))
    }
}

/// Reads whole frames from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    frame_max: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader with the pre-tuning frame limit.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(INITIAL_FRAME_MAX),
            frame_max: INITIAL_FRAME_MAX,
        }
    }

    /// Apply the negotiated frame-max.
    pub fn set_frame_max(&mut self, frame_max: u32) {
        self.frame_max = frame_max as usize;
    }

    /// Read the next frame. Cancel-safe: a partially read frame stays
    /// buffered for the next call.
    ///
    /// Returns `Ok(None)` when the peer closes cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns error on socket failure, a codec error, or EOF mid-frame.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf, self.frame_max)? {
                return Ok(Some(frame));
            }
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Io(
                    "connection reset in the middle of a frame".to_string(),
                ));
            }
        }
    }
}

/// Writes frames to a byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::with_capacity(INITIAL_FRAME_MAX),
        }
    }

    /// Send the protocol header.
    ///
    /// # Errors
    ///
    /// Returns error on socket failure.
    pub async fn write_protocol_header(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(PROTOCOL_HEADER).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Encode and send one frame.
    ///
    /// # Errors
    ///
    /// Returns error on an encoding failure or socket failure.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        self.write_frames(std::slice::from_ref(frame)).await
    }

    /// Encode and send several frames with a single flush.
    ///
    /// # Errors
    ///
    /// Returns error on an encoding failure or socket failure.
    pub async fn write_frames(&mut self, frames: &[Frame]) -> Result<(), ProtocolError> {
        self.buf.clear();
        for frame in frames {
            frame.encode(&mut self.buf)?;
        }
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Tune;

    fn encode(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        buf
    }

    fn tune_frame() -> Frame {
        Frame::method(
            0,
            Method::ConnectionTune(Tune {
                channel_max: 2047,
                frame_max: 131_072,
                heartbeat: 60,
            }),
        )
    }

    #[test]
    fn decode_waits_for_whole_frame() {
        let full = encode(&tune_frame());

        let mut buf = BytesMut::from(&full[..5]);
        assert_eq!(Frame::decode(&mut buf, 0).unwrap(), None);

        buf.extend_from_slice(&full[5..full.len() - 1]);
        assert_eq!(Frame::decode(&mut buf, 0).unwrap(), None);

        buf.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(Frame::decode(&mut buf, 0).unwrap(), Some(tune_frame()));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_leaves_following_frames() {
        let mut buf = encode(&Frame::heartbeat());
        buf.extend_from_slice(&encode(&tune_frame()));

        assert_eq!(Frame::decode(&mut buf, 0).unwrap(), Some(Frame::heartbeat()));
        assert_eq!(Frame::decode(&mut buf, 0).unwrap(), Some(tune_frame()));
        assert_eq!(Frame::decode(&mut buf, 0).unwrap(), None);
    }

    #[test]
    fn decode_rejects_bad_frames() {
        let mut bad_end = encode(&Frame::heartbeat());
        let last = bad_end.len() - 1;
        bad_end[last] = 0x00;
        assert_eq!(
            Frame::decode(&mut bad_end, 0),
            Err(CodecError::BadFrameEnd(0x00))
        );

        let mut bad_type = encode(&Frame::heartbeat());
        bad_type[0] = 9;
        assert_eq!(
            Frame::decode(&mut bad_type, 0),
            Err(CodecError::UnknownFrameType(9))
        );

        let mut oversized = encode(&Frame {
            channel: 1,
            payload: FramePayload::Body(Bytes::from(vec![0u8; 64])),
        });
        assert_eq!(
            Frame::decode(&mut oversized, 32),
            Err(CodecError::FrameTooLarge { size: 72, max: 32 })
        );

        let mut mismatch = BytesMut::from(&b"AMQP\x00\x00\x09\x01"[..]);
        assert_eq!(
            Frame::decode(&mut mismatch, 0),
            Err(CodecError::ProtocolMismatch)
        );
    }

    #[tokio::test]
    async fn reader_assembles_split_reads() {
        let full = encode(&tune_frame());
        let (head, tail) = full.split_at(9);
        let mock = tokio_test::io::Builder::new().read(head).read(tail).build();

        let mut reader = FrameReader::new(mock);
        assert_eq!(reader.read_frame().await.unwrap(), Some(tune_frame()));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_reports_eof_mid_frame() {
        let full = encode(&tune_frame());
        let mock = tokio_test::io::Builder::new().read(&full[..10]).build();

        let mut reader = FrameReader::new(mock);
        assert!(matches!(
            reader.read_frame().await,
            Err(ProtocolError::Io(_))
        ));
    }

    #[tokio::test]
    async fn writer_emits_encoded_frames() {
        let expected = encode(&Frame::heartbeat());
        let mock = tokio_test::io::Builder::new()
            .write(PROTOCOL_HEADER)
            .write(&expected)
            .build();

        let mut writer = FrameWriter::new(mock);
        writer.write_protocol_header().await.unwrap();
        writer.write_frame(&Frame::heartbeat()).await.unwrap();
    }
}
