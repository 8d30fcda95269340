//! # dualbus Core
//!
//! Verification engine for a dual-write migration between a legacy ZeroMQ
//! bus and an AMQP broker.
//!
//! This crate provides:
//! - Message records tagged with the transport they were observed on
//! - Message id normalization (legacy year prefixes)
//! - Per-transport concurrent message stores with first-seen-wins inserts
//! - The comparator that matches ids across stores and reports misses

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod comparator;
pub mod id;
pub mod record;
pub mod store;

pub use comparator::{Comparator, ComparatorConfig, Matched, MissingReport};
pub use id::normalize_message_id;
pub use record::{MessageRecord, Transport};
pub use store::MessageStore;
