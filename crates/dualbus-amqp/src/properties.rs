//! Content headers and basic message properties.

use crate::codec::{put_shortstr, put_table, Decoder, FieldTable};
use crate::error::CodecError;
use bytes::{BufMut, BytesMut};

/// Properties of the basic class carried in a content header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicProperties {
    /// MIME content type
    pub content_type: Option<String>,
    /// MIME content encoding
    pub content_encoding: Option<String>,
    /// Application headers
    pub headers: Option<FieldTable>,
    /// 1 transient, 2 persistent
    pub delivery_mode: Option<u8>,
    /// Message priority
    pub priority: Option<u8>,
    /// Correlation id
    pub correlation_id: Option<String>,
    /// Reply-to address
    pub reply_to: Option<String>,
    /// Expiration
    pub expiration: Option<String>,
    /// Application message id
    pub message_id: Option<String>,
    /// Seconds since the epoch
    pub timestamp: Option<u64>,
    /// Message type name
    pub kind: Option<String>,
    /// Publishing user id
    pub user_id: Option<String>,
    /// Publishing application id
    pub app_id: Option<String>,
    /// Deprecated cluster id
    pub cluster_id: Option<String>,
}

const CONTENT_TYPE: u16 = 1 << 15;
const CONTENT_ENCODING: u16 = 1 << 14;
const HEADERS: u16 = 1 << 13;
const DELIVERY_MODE: u16 = 1 << 12;
const PRIORITY: u16 = 1 << 11;
const CORRELATION_ID: u16 = 1 << 10;
const REPLY_TO: u16 = 1 << 9;
const EXPIRATION: u16 = 1 << 8;
const MESSAGE_ID: u16 = 1 << 7;
const TIMESTAMP: u16 = 1 << 6;
const TYPE: u16 = 1 << 5;
const USER_ID: u16 = 1 << 4;
const APP_ID: u16 = 1 << 3;
const CLUSTER_ID: u16 = 1 << 2;
const CONTINUATION: u16 = 1;

impl BasicProperties {
    /// Properties with only a message id.
    #[must_use]
    pub fn with_message_id(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..Self::default()
        }
    }

    fn flags(&self) -> u16 {
        [
            (self.content_type.is_some(), CONTENT_TYPE),
            (self.content_encoding.is_some(), CONTENT_ENCODING),
            (self.headers.is_some(), HEADERS),
            (self.delivery_mode.is_some(), DELIVERY_MODE),
            (self.priority.is_some(), PRIORITY),
            (self.correlation_id.is_some(), CORRELATION_ID),
            (self.reply_to.is_some(), REPLY_TO),
            (self.expiration.is_some(), EXPIRATION),
            (self.message_id.is_some(), MESSAGE_ID),
            (self.timestamp.is_some(), TIMESTAMP),
            (self.kind.is_some(), TYPE),
            (self.user_id.is_some(), USER_ID),
            (self.app_id.is_some(), APP_ID),
            (self.cluster_id.is_some(), CLUSTER_ID),
        ]
        .into_iter()
        .filter(|(present, _)| *present)
        .fold(0, |flags, (_, flag)| flags | flag)
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.flags());
        let strings = |buf: &mut BytesMut, values: &[&Option<String>]| {
            values
                .iter()
                .filter_map(|value| value.as_deref())
                .try_for_each(|value| put_shortstr(buf, value))
        };

        strings(buf, &[&self.content_type, &self.content_encoding])?;
        if let Some(headers) = &self.headers {
            put_table(buf, headers)?;
        }
        if let Some(mode) = self.delivery_mode {
            buf.put_u8(mode);
        }
        if let Some(priority) = self.priority {
            buf.put_u8(priority);
        }
        strings(
            buf,
            &[
                &self.correlation_id,
                &self.reply_to,
                &self.expiration,
                &self.message_id,
            ],
        )?;
        if let Some(timestamp) = self.timestamp {
            buf.put_u64(timestamp);
        }
        strings(
            buf,
            &[&self.kind, &self.user_id, &self.app_id, &self.cluster_id],
        )
    }

    fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let flags = d.u16()?;
        let mut extra = flags;
        while extra & CONTINUATION != 0 {
            extra = d.u16()?;
        }

        let string = |d: &mut Decoder<'_>, flag: u16| -> Result<Option<String>, CodecError> {
            if flags & flag == 0 {
                Ok(None)
            } else {
                d.shortstr().map(Some)
            }
        };

        let content_type = string(d, CONTENT_TYPE)?;
        let content_encoding = string(d, CONTENT_ENCODING)?;
        let headers = if flags & HEADERS == 0 {
            None
        } else {
            Some(d.table()?)
        };
        let delivery_mode = if flags & DELIVERY_MODE == 0 {
            None
        } else {
            Some(d.u8()?)
        };
        let priority = if flags & PRIORITY == 0 {
            None
        } else {
            Some(d.u8()?)
        };
        let correlation_id = string(d, CORRELATION_ID)?;
        let reply_to = string(d, REPLY_TO)?;
        let expiration = string(d, EXPIRATION)?;
        let message_id = string(d, MESSAGE_ID)?;
        let timestamp = if flags & TIMESTAMP == 0 {
            None
        } else {
            Some(d.u64()?)
        };

        Ok(Self {
            content_type,
            content_encoding,
            headers,
            delivery_mode,
            priority,
            correlation_id,
            reply_to,
            expiration,
            message_id,
            timestamp,
            kind: string(d, TYPE)?,
            user_id: string(d, USER_ID)?,
            app_id: string(d, APP_ID)?,
            cluster_id: string(d, CLUSTER_ID)?,
        })
    }
}

/// A content header frame payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    /// Class of the content (60 for basic)
    pub class_id: u16,
    /// Total body size across body frames
    pub body_size: u64,
    /// Message properties
    pub properties: BasicProperties,
}

impl ContentHeader {
    /// Encode the header payload.
    ///
    /// # Errors
    ///
    /// Returns error if a property exceeds its wire limit.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.class_id);
        buf.put_u16(0);
        buf.put_u64(self.body_size);
        self.properties.encode(buf)
    }

    /// Decode a header payload.
    ///
    /// # Errors
    ///
    /// Returns error on truncated input.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut d = Decoder::new(payload);
        let class_id = d.u16()?;
        d.u16()?;
        let body_size = d.u64()?;
        let properties = BasicProperties::decode(&mut d)?;
        Ok(Self {
            class_id,
            body_size,
            properties,
        })
    }
}
