//! Error types for the AMQP client.

use std::time::Duration;

/// Malformed or unsupported wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input ended before a value was complete
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        remaining: usize,
    },
    /// Short string longer than 255 bytes
    #[error("short string too long: {0} bytes")]
    ShortStringTooLong(usize),
    /// Long string or table larger than `u32::MAX`
    #[error("value too long: {0} bytes")]
    ValueTooLong(usize),
    /// Unknown field-table value tag
    #[error("unknown field type: {0:#04x}")]
    UnknownFieldType(u8),
    /// Unknown frame type octet
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
    /// Frame did not end with 0xCE
    #[error("bad frame end: {0:#04x}")]
    BadFrameEnd(u8),
    /// Frame exceeds the negotiated maximum
    #[error("frame of {size} bytes exceeds frame-max {max}")]
    FrameTooLarge {
        /// Frame size including overhead
        size: usize,
        /// Negotiated maximum
        max: usize,
    },
    /// Method this client does not implement
    #[error("unknown method {class}.{method}")]
    UnknownMethod {
        /// Class id
        class: u16,
        /// Method id
        method: u16,
    },
    /// Broker answered with its own protocol header
    #[error("broker does not support AMQP 0-9-1")]
    ProtocolMismatch,
}

/// Errors surfaced by connections, channels and consumers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// Connection URL is malformed or unsupported
    #[error("invalid AMQP URL: {0}")]
    InvalidUrl(String),
    /// Socket error
    #[error("I/O error: {0}")]
    Io(String),
    /// Wire data error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Operation did not complete in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Connection negotiation failed
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Broker closed the connection
    #[error("connection closed by broker: {code} {text}")]
    ConnectionClosed {
        /// AMQP reply code
        code: u16,
        /// Reply text
        text: String,
    },
    /// No open connection to talk to
    #[error("not connected")]
    NotConnected,
    /// Broker closed the channel
    #[error("channel {channel} closed by broker: {code} {text}")]
    ChannelClosed {
        /// Channel id
        channel: u16,
        /// AMQP reply code
        code: u16,
        /// Reply text
        text: String,
    },
    /// Operation on a channel that is not open
    #[error("channel {0} is not open")]
    ChannelNotOpen(u16),
    /// Every channel id is in use
    #[error("no free channel ids")]
    ChannelsExhausted,
    /// Reply did not match the request
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl ProtocolError {
    /// Whether a later reconnect may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }
}
