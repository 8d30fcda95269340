//! Per-transport message stores.

use crate::record::{MessageRecord, Transport};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent mapping from normalized message id to the first record seen.
///
/// Cloning is cheap and yields a handle onto the same store. The owning
/// ingest source inserts, the comparator removes.
#[derive(Debug, Clone)]
pub struct MessageStore {
    transport: Transport,
    entries: Arc<DashMap<String, MessageRecord>>,
}

impl MessageStore {
    /// Create an empty store for a transport.
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// The transport this store records.
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Insert a record unless its id is already present.
    ///
    /// Returns `true` if the record was stored. A duplicate keeps the
    /// original receipt time.
    pub fn insert(&self, record: MessageRecord) -> bool {
        match self.entries.entry(record.message_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Remove an id, returning its record.
    pub fn remove(&self, message_id: &str) -> Option<MessageRecord> {
        self.entries.remove(message_id).map(|(_, record)| record)
    }

    /// Whether an id is pending in this store.
    #[must_use]
    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    /// Clone of the record stored for an id.
    #[must_use]
    pub fn get(&self, message_id: &str) -> Option<MessageRecord> {
        self.entries.get(message_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the ids currently pending.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of pending ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every record received strictly before `threshold`.
    pub fn drain_expired(&self, threshold: DateTime<Utc>) -> Vec<MessageRecord> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().received_at < threshold)
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                self.entries
                    .remove_if(&id, |_, record| record.received_at < threshold)
                    .map(|(_, record)| record)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn record(id: &str, secs: i64) -> MessageRecord {
        MessageRecord::observed(id, "t", serde_json::json!({"n": secs}), at(secs))
    }

    #[test]
    fn duplicate_insert_keeps_first_receipt() {
        let store = MessageStore::new(Transport::Amqp);

        assert!(store.insert(record("dup", 0)));
        assert!(!store.insert(record("dup", 5)));

        assert_eq!(store.len(), 1);
        let kept = store.get("dup").unwrap();
        assert_eq!(kept.received_at, at(0));
        assert_eq!(kept.raw_payload, serde_json::json!({"n": 0}));
    }

    #[test]
    fn prefixed_and_plain_ids_collide() {
        let store = MessageStore::new(Transport::Zmq);

        assert!(store.insert(record("2024-abc", 0)));
        assert!(!store.insert(record("abc", 1)));
        assert!(store.contains("abc"));
    }

    #[test]
    fn drain_expired_is_strict() {
        let store = MessageStore::new(Transport::Amqp);
        store.insert(record("old", 0));
        store.insert(record("edge", 10));
        store.insert(record("new", 15));

        let drained = store.drain_expired(at(10));

        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message_id, "old");
        assert!(store.contains("edge"));
        assert!(store.contains("new"));
    }

    #[test]
    fn clones_share_entries() {
        let store = MessageStore::new(Transport::Zmq);
        let handle = store.clone();

        handle.insert(record("shared", 0));
        assert!(store.contains("shared"));
        assert!(store.remove("shared").is_some());
        assert!(handle.is_empty());
    }
}
