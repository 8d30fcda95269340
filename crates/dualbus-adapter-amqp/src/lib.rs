//! # AMQP Adapter
//!
//! Ingests deliveries from an AMQP 0-9-1 broker into the AMQP message store.
//!
//! ## Sessions
//!
//! Every time the connection opens (initially and after each reconnect) the
//! source opens a channel, declares its queues and exchanges, binds them and
//! starts one consumer per queue. Deliveries are acknowledged once stored,
//! and also when they cannot be decoded so that poison messages do not loop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod handler;
pub mod source;

pub use handler::{Ingest, StoreHandler};
pub use source::{AmqpIngestSource, AmqpSourceConfig, SourceError};
