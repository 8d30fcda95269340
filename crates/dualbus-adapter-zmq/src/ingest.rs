//! Frame ingestion into the ZeroMQ store.

use chrono::{DateTime, Utc};
use dualbus_core::MessageStore;
use dualbus_proto::{EnvelopeError, LegacyEnvelope};

/// Outcome of ingesting one multipart message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// First sighting, stored
    Stored,
    /// Id already pending, original receipt time kept
    Duplicate,
    /// Malformed or unidentified, skipped
    Skipped,
}

/// Decode a `[topic, body, ...]` message and insert it, first-seen wins.
///
/// Failures are logged and reported as [`FrameOutcome::Skipped`]; they never
/// affect the next message.
pub fn ingest_frames<B: AsRef<[u8]>>(
    store: &MessageStore,
    frames: &[B],
    received_at: DateTime<Utc>,
) -> FrameOutcome {
    let envelope = match LegacyEnvelope::from_frames(frames) {
        Ok(envelope) => envelope,
        Err(EnvelopeError::MissingIdentifier) => {
            tracing::info!(topic = %topic_hint(frames), "Dropping ZeroMQ message without msg_id");
            return FrameOutcome::Skipped;
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                topic = %topic_hint(frames),
                frames = frames.len(),
                "Failed to decode ZeroMQ message"
            );
            return FrameOutcome::Skipped;
        }
    };

    let record = envelope.into_record(received_at);
    let msg_id = record.message_id.clone();
    let topic = record.topic.clone();
    if store.insert(record) {
        tracing::debug!(msg_id = %msg_id, topic = %topic, transport = "zmq", "Message stored");
        FrameOutcome::Stored
    } else {
        tracing::debug!(msg_id = %msg_id, topic = %topic, "Duplicate ZeroMQ message ignored");
        FrameOutcome::Duplicate
    }
}

fn topic_hint<B: AsRef<[u8]>>(frames: &[B]) -> String {
    frames
        .first()
        .map(|topic| String::from_utf8_lossy(topic.as_ref()).into_owned())
        .unwrap_or_default()
}
