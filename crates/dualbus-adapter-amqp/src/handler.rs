//! Delivery handling into the AMQP store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dualbus_amqp::{Delivery, DeliveryHandler, HandlerError};
use dualbus_core::MessageStore;
use dualbus_proto::BrokerMessage;

/// Outcome of ingesting one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// First sighting, stored
    Stored,
    /// Id already pending, original receipt time kept
    Duplicate,
    /// Undecodable or unidentified, dropped
    Dropped,
}

/// Stores every decodable delivery under its normalized message id.
#[derive(Debug, Clone)]
pub struct StoreHandler {
    store: MessageStore,
}

impl StoreHandler {
    /// Create a handler writing into `store`.
    #[must_use]
    pub fn new(store: MessageStore) -> Self {
        Self { store }
    }

    /// Decode a delivery and insert it, first-seen wins.
    pub fn ingest(
        &self,
        routing_key: &str,
        message_id: Option<&str>,
        body: &[u8],
        received_at: DateTime<Utc>,
    ) -> Ingest {
        let message = match BrokerMessage::decode(routing_key, message_id, body) {
            Ok(message) => message,
            Err(e) if e.is_missing_identifier() => {
                tracing::info!(topic = routing_key, "Dropping AMQP message without an id");
                return Ingest::Dropped;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    topic = routing_key,
                    body_len = body.len(),
                    "Failed to decode AMQP message"
                );
                return Ingest::Dropped;
            }
        };

        let record = message.into_record(received_at);
        let msg_id = record.message_id.clone();
        if self.store.insert(record) {
            tracing::debug!(msg_id = %msg_id, topic = routing_key, transport = "amqp", "Message stored");
            Ingest::Stored
        } else {
            tracing::debug!(msg_id = %msg_id, topic = routing_key, "Duplicate AMQP message ignored");
            Ingest::Duplicate
        }
    }
}

#[async_trait]
impl DeliveryHandler for StoreHandler {
    /// Never fails: undecodable messages are acknowledged and dropped.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        self.ingest(
            &delivery.routing_key,
            delivery.properties.message_id.as_deref(),
            &delivery.body,
            Utc::now(),
        );
        Ok(())
    }
}
