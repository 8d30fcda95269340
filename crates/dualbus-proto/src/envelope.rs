//! Message envelopes for both transports.

use chrono::{DateTime, Utc};
use dualbus_core::{normalize_message_id, MessageRecord};
use serde_json::Value;

/// Body field carrying the message id on the legacy bus.
pub const MSG_ID_FIELD: &str = "msg_id";

/// A message decoded from the legacy ZeroMQ bus.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEnvelope {
    /// Topic frame
    pub topic: String,
    /// Raw message id (may carry a year prefix)
    pub msg_id: String,
    /// Decoded body
    pub body: Value,
}

impl LegacyEnvelope {
    /// Decode a multipart ZeroMQ message `[topic, body, ...]`.
    ///
    /// # Errors
    ///
    /// Returns error if fewer than two frames are present, the topic is not
    /// UTF-8, or the body fails [`LegacyEnvelope::decode`].
    pub fn from_frames<B: AsRef<[u8]>>(frames: &[B]) -> Result<Self, EnvelopeError> {
        let [topic, body, ..] = frames else {
            return Err(EnvelopeError::IncompleteFrames(frames.len()));
        };
        let topic = std::str::from_utf8(topic.as_ref())
            .map_err(|e| EnvelopeError::InvalidTopic(e.to_string()))?;
        Self::decode(topic, body.as_ref())
    }

    /// Decode a JSON body published on `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the body is not a JSON object or lacks a usable
    /// `msg_id`.
    pub fn decode(topic: &str, body: &[u8]) -> Result<Self, EnvelopeError> {
        let body: Value =
            serde_json::from_slice(body).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        if !body.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }
        let msg_id = body_msg_id(&body).ok_or(EnvelopeError::MissingIdentifier)?;

        Ok(Self {
            topic: topic.to_string(),
            msg_id,
            body,
        })
    }

    /// Convert into a store record received at `received_at`.
    #[must_use]
    pub fn into_record(self, received_at: DateTime<Utc>) -> MessageRecord {
        MessageRecord::observed(&self.msg_id, self.topic, self.body, received_at)
    }
}

/// A message decoded from an AMQP delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    /// Routing key
    pub topic: String,
    /// Raw message id (may carry a year prefix)
    pub message_id: String,
    /// Decoded body
    pub body: Value,
}

impl BrokerMessage {
    /// Decode a delivery body, taking the id from the `message_id` property
    /// and falling back to a `msg_id` body field.
    ///
    /// # Errors
    ///
    /// Returns error if the body is not JSON or no usable id is present.
    pub fn decode(
        routing_key: &str,
        message_id_property: Option<&str>,
        body: &[u8],
    ) -> Result<Self, EnvelopeError> {
        let body: Value =
            serde_json::from_slice(body).map_err(|e| EnvelopeError::Decode(e.to_string()))?;

        let message_id = message_id_property
            .filter(|id| is_usable_id(id))
            .map(str::to_string)
            .or_else(|| body_msg_id(&body))
            .ok_or(EnvelopeError::MissingIdentifier)?;

        Ok(Self {
            topic: routing_key.to_string(),
            message_id,
            body,
        })
    }

    /// Convert into a store record received at `received_at`.
    #[must_use]
    pub fn into_record(self, received_at: DateTime<Utc>) -> MessageRecord {
        MessageRecord::observed(&self.message_id, self.topic, self.body, received_at)
    }
}

fn body_msg_id(body: &Value) -> Option<String> {
    body.get(MSG_ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| is_usable_id(id))
        .map(str::to_string)
}

/// An id is usable if something is left after normalization.
fn is_usable_id(id: &str) -> bool {
    !normalize_message_id(id).is_empty()
}

/// Errors decoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Payload is not valid JSON
    #[error("decode error: {0}")]
    Decode(String),
    /// Legacy body is valid JSON but not an object
    #[error("message body is not a JSON object")]
    NotAnObject,
    /// No message id in properties or body
    #[error("message has no identifier")]
    MissingIdentifier,
    /// Fewer than two frames in a multipart message
    #[error("incomplete multipart message: {0} frame(s)")]
    IncompleteFrames(usize),
    /// Topic frame is not UTF-8
    #[error("invalid topic frame: {0}")]
    InvalidTopic(String),
}

impl EnvelopeError {
    /// Whether the message was well-formed but carried no id.
    #[must_use]
    pub fn is_missing_identifier(&self) -> bool {
        matches!(self, Self::MissingIdentifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn legacy_frames_decode() {
        let body = br#"{"msg_id": "2024-dummy-msgid", "body": "dummy-body"}"#;
        let frames: [&[u8]; 2] = [b"dummy.topic", body];

        let envelope = LegacyEnvelope::from_frames(&frames).unwrap();

        assert_eq!(envelope.topic, "dummy.topic");
        assert_eq!(envelope.msg_id, "2024-dummy-msgid");

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = envelope.into_record(at);
        assert_eq!(record.message_id, "dummy-msgid");
        assert_eq!(record.raw_payload["body"], "dummy-body");
    }

    #[test]
    fn legacy_single_frame_is_incomplete() {
        let frames: [&[u8]; 1] = [b"topic-only"];
        assert_eq!(
            LegacyEnvelope::from_frames(&frames),
            Err(EnvelopeError::IncompleteFrames(1))
        );
    }

    #[test]
    fn legacy_malformed_body() {
        assert!(matches!(
            LegacyEnvelope::decode("t", b"{not json"),
            Err(EnvelopeError::Decode(_))
        ));
        assert_eq!(
            LegacyEnvelope::decode("t", b"[1, 2]"),
            Err(EnvelopeError::NotAnObject)
        );
    }

    #[test]
    fn legacy_missing_id() {
        let err = LegacyEnvelope::decode("t", br#"{"body": 1}"#).unwrap_err();
        assert!(err.is_missing_identifier());

        let err = LegacyEnvelope::decode("t", br#"{"msg_id": 42}"#).unwrap_err();
        assert!(err.is_missing_identifier());

        let err = LegacyEnvelope::decode("t", br#"{"msg_id": "2024-"}"#).unwrap_err();
        assert!(err.is_missing_identifier());
    }

    #[test]
    fn broker_prefers_property_id() {
        let message =
            BrokerMessage::decode("org.example.t", Some("2024-abc"), br#"{"msg_id": "other"}"#)
                .unwrap();
        assert_eq!(message.message_id, "2024-abc");
        assert_eq!(message.topic, "org.example.t");
    }

    #[test]
    fn broker_falls_back_to_body_id() {
        let message = BrokerMessage::decode("t", None, br#"{"msg_id": "abc"}"#).unwrap();
        assert_eq!(message.message_id, "abc");

        let message = BrokerMessage::decode("t", Some(""), br#"{"msg_id": "abc"}"#).unwrap();
        assert_eq!(message.message_id, "abc");
    }

    #[test]
    fn broker_without_id_or_json() {
        assert_eq!(
            BrokerMessage::decode("t", None, br#"{"x": 1}"#),
            Err(EnvelopeError::MissingIdentifier)
        );
        assert!(matches!(
            BrokerMessage::decode("t", Some("abc"), b"\xff\xfe"),
            Err(EnvelopeError::Decode(_))
        ));
    }
}
