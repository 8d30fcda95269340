//! Cross-transport matching and missing-message reports.
//!
//! Messages travel the two transports on independent paths and may arrive in
//! either order. The comparator runs two periodic tasks:
//!
//! 1. **Match**: ids present in both stores are delivered; remove them.
//! 2. **Sweep**: ids that stayed in one store longer than the match window
//!    are reported as missing from the other transport, then purged.
//!
//! Both tasks reason about arrival only through recorded receipt times.

use crate::record::Transport;
use crate::store::MessageStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Comparator timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparatorConfig {
    /// How long an unmatched message may stay pending before it is reported
    pub match_window: Duration,
    /// Period of the match task
    pub match_interval: Duration,
    /// Period of the sweep task
    pub sweep_interval: Duration,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            match_window: Duration::from_secs(20),
            match_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// A message confirmed on both transports.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    /// Normalized message id
    pub message_id: String,
    /// Topic as seen on AMQP
    pub topic: String,
    /// ZeroMQ receipt time minus AMQP receipt time
    pub skew: chrono::Duration,
}

/// A message seen on only one transport within the match window.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingReport {
    /// Normalized message id
    pub message_id: String,
    /// Topic of the observed message
    pub topic: String,
    /// Transport the message was observed on
    pub seen_on: Transport,
    /// Transport the message never arrived on
    pub missing_from: Transport,
    /// When the message was observed
    pub received_at: DateTime<Utc>,
}

/// Matches ids across the AMQP and ZeroMQ stores.
#[derive(Debug, Clone)]
pub struct Comparator {
    amqp: MessageStore,
    zmq: MessageStore,
    config: ComparatorConfig,
}

impl Comparator {
    /// Create a comparator over the two stores.
    #[must_use]
    pub fn new(amqp: MessageStore, zmq: MessageStore, config: ComparatorConfig) -> Self {
        debug_assert_eq!(amqp.transport(), Transport::Amqp);
        debug_assert_eq!(zmq.transport(), Transport::Zmq);
        Self { amqp, zmq, config }
    }

    /// The comparator's timing configuration.
    #[must_use]
    pub fn config(&self) -> &ComparatorConfig {
        &self.config
    }

    /// Remove every id present in both stores.
    pub fn match_pending(&self) -> Vec<Matched> {
        tracing::debug!(
            amqp_pending = self.amqp.len(),
            zmq_pending = self.zmq.len(),
            "Checking for matching messages"
        );

        let mut matched = Vec::new();
        for message_id in self.amqp.ids() {
            let Some(zmq_record) = self.zmq.remove(&message_id) else {
                continue;
            };
            let Some(amqp_record) = self.amqp.remove(&message_id) else {
                // Swept between the snapshot and now; leave the ZeroMQ side pending.
                self.zmq.insert(zmq_record);
                continue;
            };

            let skew = zmq_record
                .received_at
                .signed_duration_since(amqp_record.received_at);
            tracing::info!(
                msg_id = %message_id,
                topic = %amqp_record.topic,
                skew_ms = skew.num_milliseconds(),
                "Message received on both transports"
            );
            matched.push(Matched {
                message_id,
                topic: amqp_record.topic,
                skew,
            });
        }
        matched
    }

    /// Report and purge every entry older than the match window.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<MissingReport> {
        tracing::debug!("Checking for missing messages");

        let Ok(window) = chrono::Duration::from_std(self.config.match_window) else {
            return Vec::new();
        };
        let Some(threshold) = now.checked_sub_signed(window) else {
            return Vec::new();
        };

        let mut reports = Vec::new();
        for store in [&self.amqp, &self.zmq] {
            let seen_on = store.transport();
            for record in store.drain_expired(threshold) {
                tracing::warn!(
                    msg_id = %record.message_id,
                    topic = %record.topic,
                    seen_on = %seen_on,
                    missing_from = %seen_on.other(),
                    age_ms = record.age(now).num_milliseconds(),
                    "Message missing from transport"
                );
                reports.push(MissingReport {
                    message_id: record.message_id,
                    topic: record.topic,
                    seen_on,
                    missing_from: seen_on.other(),
                    received_at: record.received_at,
                });
            }
        }
        reports
    }

    /// Drive the match and sweep tasks until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        // interval() panics on a zero period.
        let floor = Duration::from_millis(1);
        let mut match_tick = tokio::time::interval(self.config.match_interval.max(floor));
        let mut sweep_tick = tokio::time::interval(self.config.sweep_interval.max(floor));
        match_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            match_window_secs = self.config.match_window.as_secs_f64(),
            match_interval_secs = self.config.match_interval.as_secs_f64(),
            sweep_interval_secs = self.config.sweep_interval.as_secs_f64(),
            "Comparator started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("Stopping comparator");
                    break;
                }
                _ = match_tick.tick() => {
                    self.match_pending();
                }
                _ = sweep_tick.tick() => {
                    self.sweep(Utc::now());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MessageRecord;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn record(id: &str, topic: &str, secs: i64) -> MessageRecord {
        MessageRecord::observed(id, topic, serde_json::Value::Null, at(secs))
    }

    fn comparator() -> (Comparator, MessageStore, MessageStore) {
        let amqp = MessageStore::new(Transport::Amqp);
        let zmq = MessageStore::new(Transport::Zmq);
        let comparator = Comparator::new(amqp.clone(), zmq.clone(), ComparatorConfig::default());
        (comparator, amqp, zmq)
    }

    #[test]
    fn prefixed_broker_id_matches_plain_legacy_id() {
        let (comparator, amqp, zmq) = comparator();
        amqp.insert(record("2024-abc123", "t", 0));
        zmq.insert(record("abc123", "t", 2));

        let matched = comparator.match_pending();

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].message_id, "abc123");
        assert_eq!(matched[0].skew, chrono::Duration::seconds(2));
        assert!(amqp.is_empty());
        assert!(zmq.is_empty());
        assert!(comparator.sweep(at(60)).is_empty());
    }

    #[test]
    fn unmatched_id_is_reported_once_after_window() {
        let (comparator, amqp, _zmq) = comparator();
        amqp.insert(record("xyz", "t", 0));

        assert!(comparator.match_pending().is_empty());
        assert!(comparator.sweep(at(20)).is_empty());

        let reports = comparator.sweep(at(21));
        assert_eq!(
            reports,
            vec![MissingReport {
                message_id: "xyz".to_string(),
                topic: "t".to_string(),
                seen_on: Transport::Amqp,
                missing_from: Transport::Zmq,
                received_at: at(0),
            }]
        );
        assert!(amqp.is_empty());
        assert!(comparator.sweep(at(40)).is_empty());
    }

    #[test]
    fn sweep_reports_both_directions() {
        let (comparator, amqp, zmq) = comparator();
        amqp.insert(record("only-amqp", "a", 0));
        zmq.insert(record("only-zmq", "z", 0));
        zmq.insert(record("fresh", "z", 30));

        let mut reports = comparator.sweep(at(30));
        reports.sort_by(|a, b| a.message_id.cmp(&b.message_id));

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].message_id, "only-amqp");
        assert_eq!(reports[0].missing_from, Transport::Zmq);
        assert_eq!(reports[1].message_id, "only-zmq");
        assert_eq!(reports[1].missing_from, Transport::Amqp);
        assert!(zmq.contains("fresh"));
    }

    #[test]
    fn matching_leaves_unpaired_ids_pending() {
        let (comparator, amqp, zmq) = comparator();
        amqp.insert(record("both", "t", 0));
        amqp.insert(record("amqp-only", "t", 0));
        zmq.insert(record("both", "t", 1));
        zmq.insert(record("zmq-only", "t", 1));

        let matched = comparator.match_pending();

        assert_eq!(matched.len(), 1);
        assert!(amqp.contains("amqp-only"));
        assert!(zmq.contains("zmq-only"));
        assert!(!amqp.contains("both"));
        assert!(!zmq.contains("both"));
    }

    #[tokio::test]
    async fn run_matches_until_cancelled() {
        let amqp = MessageStore::new(Transport::Amqp);
        let zmq = MessageStore::new(Transport::Zmq);
        let config = ComparatorConfig {
            match_window: Duration::from_secs(60),
            match_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(10),
        };
        let comparator = Comparator::new(amqp.clone(), zmq.clone(), config);
        let shutdown = CancellationToken::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { comparator.run(shutdown).await })
        };

        let now = Utc::now();
        amqp.insert(MessageRecord::observed("live", "t", serde_json::Value::Null, now));
        zmq.insert(MessageRecord::observed("live", "t", serde_json::Value::Null, now));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(amqp.is_empty());
        assert!(zmq.is_empty());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("comparator did not stop")
            .unwrap();
    }
}
