//! # ZeroMQ Adapter
//!
//! Ingests the legacy bus into the ZeroMQ message store.
//!
//! Publishers bind, so the source connects one SUB socket to every
//! configured endpoint and subscribes to every topic. Each endpoint is kept
//! subscribed by its own task, which dials again after a failed connect or
//! a long silence. Messages arrive as
//! `[topic, body]` frame pairs where the body is a JSON object carrying a
//! `msg_id` field.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ingest;
pub mod registry;
pub mod source;

pub use ingest::{ingest_frames, FrameOutcome};
pub use registry::{Dialer, FrameSubscriber, SharedSocket, SocketRegistry, SubDialer};
pub use source::{SourceError, ZmqIngestSource, ZmqSourceConfig};
