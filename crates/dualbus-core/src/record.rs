//! Observed message records.

use crate::id::normalize_message_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The transport a message was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// The AMQP broker
    Amqp,
    /// The legacy ZeroMQ bus
    Zmq,
}

impl Transport {
    /// The transport a message should also have been observed on.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Amqp => Self::Zmq,
            Self::Zmq => Self::Amqp,
        }
    }

    /// Human-readable transport name used in reports.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Amqp => "AMQP",
            Self::Zmq => "ZeroMQ",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single message observed on one transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Normalized message id
    pub message_id: String,
    /// Application topic (routing key on AMQP, topic frame on ZeroMQ)
    pub topic: String,
    /// When the message was received by this process
    pub received_at: DateTime<Utc>,
    /// Decoded payload, passed through unexamined
    pub raw_payload: serde_json::Value,
}

impl MessageRecord {
    /// Build a record from a raw (possibly year-prefixed) message id.
    #[must_use]
    pub fn observed(
        raw_id: &str,
        topic: impl Into<String>,
        raw_payload: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: normalize_message_id(raw_id).to_string(),
            topic: topic.into(),
            received_at,
            raw_payload,
        }
    }

    /// Time elapsed since the message was received.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.received_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn other_transport_is_symmetric() {
        assert_eq!(Transport::Amqp.other(), Transport::Zmq);
        assert_eq!(Transport::Zmq.other(), Transport::Amqp);
        assert_eq!(Transport::Zmq.to_string(), "ZeroMQ");
    }

    #[test]
    fn observed_record_is_normalized() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = MessageRecord::observed("2024-abc123", "t", serde_json::Value::Null, at);

        assert_eq!(record.message_id, "abc123");
        assert_eq!(record.topic, "t");
        assert_eq!(
            record.age(at + chrono::Duration::seconds(3)),
            chrono::Duration::seconds(3)
        );
    }
}
