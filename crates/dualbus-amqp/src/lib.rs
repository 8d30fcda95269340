//! # dualbus AMQP
//!
//! A minimal asynchronous AMQP 0-9-1 client covering what a verifying
//! consumer needs: connect, open a channel, declare exchanges and queues,
//! bind, consume, acknowledge or reject, cancel and close.
//!
//! ## Layers
//!
//! - `codec`, `method`, `properties`, `frame`: wire encoding
//! - `state`: pure connection, channel and consumer state machines
//! - `rpc`: request table pairing replies with outstanding requests
//! - `driver`: per-socket I/O task multiplexing frames, commands and heartbeats
//! - `connection`: supervisor driving the connection state machine,
//!   reconnecting after a fixed delay when the broker goes away
//! - `channel`, `exchange`, `queue`, `consumer`: the user-facing handles

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod codec;
pub mod connection;
pub mod consumer;
mod driver;
pub mod error;
pub mod exchange;
pub mod frame;
mod handshake;
pub mod method;
pub mod params;
pub mod properties;
pub mod queue;
pub mod rpc;
pub mod state;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use channel::Channel;
pub use codec::{FieldTable, FieldValue};
pub use connection::Connection;
pub use consumer::{Consumer, ConsumerExit, Delivery, DeliveryHandler, HandlerError};
pub use error::{CodecError, ProtocolError};
pub use exchange::{Exchange, ExchangeKind};
pub use params::ConnectionParams;
pub use properties::BasicProperties;
pub use queue::Queue;
pub use state::{ChannelState, ConnectionState, ConsumerState};
