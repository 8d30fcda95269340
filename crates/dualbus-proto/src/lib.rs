//! # dualbus Protocol
//!
//! Wire formats observed by the verifier and the broker topology it binds.
//!
//! ## Envelopes
//!
//! - `LegacyEnvelope`: two-frame ZeroMQ message `[topic, json-body]` whose
//!   body carries a `msg_id` string, possibly prefixed with `YYYY-`
//! - `BrokerMessage`: AMQP delivery with a `message_id` property (or a
//!   `msg_id` body field) and the routing key as topic
//!
//! ## Bindings
//!
//! `Binding` entries from configuration are validated and grouped into a
//! `Topology` of exchanges and queues to declare.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binding;
pub mod envelope;

pub use binding::{Binding, BindingError, QueuePlan, Route, Topology};
pub use envelope::{BrokerMessage, EnvelopeError, LegacyEnvelope};
