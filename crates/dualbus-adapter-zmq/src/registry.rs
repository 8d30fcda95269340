//! SUB sockets owned by the ZeroMQ source.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::Mutex;
use zeromq::prelude::*;
use zeromq::{SubSocket, ZmqError};

/// A socket yielding multipart messages.
#[async_trait]
pub trait FrameSubscriber: Send + 'static {
    /// Receive error.
    type Error: Display + Send;

    /// Receive the next multipart message as its frames.
    async fn recv_frames(&mut self) -> Result<Vec<Bytes>, Self::Error>;
}

#[async_trait]
impl FrameSubscriber for SubSocket {
    type Error = ZmqError;

    async fn recv_frames(&mut self) -> Result<Vec<Bytes>, ZmqError> {
        let message = self.recv().await?;
        Ok(message.iter().cloned().collect())
    }
}

/// Opens subscriber sockets.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Socket produced by a successful dial.
    type Socket: FrameSubscriber;
    /// Dial error.
    type Error: Display + Send;

    /// Connect to `endpoint` and subscribe to every topic.
    ///
    /// A dial may wait indefinitely for an unreachable publisher; callers
    /// bound it with their own timeout.
    async fn dial(&self, endpoint: &str) -> Result<Self::Socket, Self::Error>;
}

/// Dials `zeromq` SUB sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubDialer;

#[async_trait]
impl Dialer for SubDialer {
    type Socket = SubSocket;
    type Error = ZmqError;

    async fn dial(&self, endpoint: &str) -> Result<SubSocket, ZmqError> {
        let mut socket = SubSocket::new();
        socket.connect(endpoint).await?;
        socket.subscribe("").await?;
        Ok(socket)
    }
}

#[async_trait]
impl<D: Dialer> Dialer for Arc<D> {
    type Socket = D::Socket;
    type Error = D::Error;

    async fn dial(&self, endpoint: &str) -> Result<D::Socket, D::Error> {
        self.as_ref().dial(endpoint).await
    }
}

/// Handle to a registered socket.
pub type SharedSocket<S> = Arc<Mutex<S>>;

/// Sockets keyed by endpoint, at most one per endpoint.
///
/// The registry lives as long as one run of the source and is shared by
/// its endpoint tasks. Dialing an endpoint again replaces its socket;
/// releasing the registry drops every socket and with it the connection to
/// the publisher.
pub struct SocketRegistry<D: Dialer = SubDialer> {
    dialer: D,
    sockets: DashMap<String, SharedSocket<D::Socket>>,
}

impl SocketRegistry<SubDialer> {
    /// Create an empty registry dialing `zeromq` SUB sockets.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dialer(SubDialer)
    }
}

impl Default for SocketRegistry<SubDialer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Dialer> SocketRegistry<D> {
    /// Create an empty registry using `dialer`.
    #[must_use]
    pub fn with_dialer(dialer: D) -> Self {
        Self {
            dialer,
            sockets: DashMap::new(),
        }
    }

    /// Dial `endpoint` and register the new socket, replacing any socket
    /// already registered for it.
    ///
    /// # Errors
    ///
    /// Returns the dialer's error; the registry is unchanged in that case.
    pub async fn dial(&self, endpoint: &str) -> Result<SharedSocket<D::Socket>, D::Error> {
        let socket = Arc::new(Mutex::new(self.dialer.dial(endpoint).await?));
        if self
            .sockets
            .insert(endpoint.to_string(), Arc::clone(&socket))
            .is_some()
        {
            tracing::debug!(endpoint = %endpoint, "Replaced SUB socket");
        }
        Ok(socket)
    }

    /// Handle to the socket for `endpoint`.
    #[must_use]
    pub fn get(&self, endpoint: &str) -> Option<SharedSocket<D::Socket>> {
        self.sockets
            .get(endpoint)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Registered endpoints in sorted order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .sockets
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        endpoints.sort();
        endpoints
    }

    /// Number of sockets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Whether no socket is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Drop every socket. Returns how many were released.
    pub fn release(&self) -> usize {
        let endpoints = self.endpoints();
        for endpoint in &endpoints {
            tracing::debug!(endpoint = %endpoint, "Releasing SUB socket");
            self.sockets.remove(endpoint);
        }
        endpoints.len()
    }
}
