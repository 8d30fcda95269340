//! ZeroMQ ingest source.

use crate::ingest::ingest_frames;
use crate::registry::{Dialer, FrameSubscriber, SharedSocket, SocketRegistry, SubDialer};
use chrono::Utc;
use dualbus_core::MessageStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use zeromq::Endpoint;

/// Configuration for the ZeroMQ ingest source.
#[derive(Debug, Clone)]
pub struct ZmqSourceConfig {
    /// Publisher endpoints to connect to (e.g., <tcp://hub.example.com:9940>)
    pub endpoints: Vec<String>,
    /// Longest a single dial may take before it is abandoned
    pub connect_timeout: Duration,
    /// Silence after which the endpoint is dialed again
    pub idle_timeout: Duration,
    /// Pause after a receive or dial error before trying again
    pub error_pause: Duration,
}

impl Default for ZmqSourceConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            error_pause: Duration::from_secs(1),
        }
    }
}

/// Timings shared by every endpoint task.
#[derive(Debug, Clone, Copy)]
struct Timing {
    connect_timeout: Duration,
    idle_timeout: Duration,
    error_pause: Duration,
}

impl From<&ZmqSourceConfig> for Timing {
    fn from(config: &ZmqSourceConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            error_pause: config.error_pause,
        }
    }
}

/// Subscribes to the legacy bus and records every message in the ZeroMQ
/// store.
pub struct ZmqIngestSource<D: Dialer = SubDialer> {
    config: ZmqSourceConfig,
    store: MessageStore,
    dialer: D,
}

impl ZmqIngestSource<SubDialer> {
    /// Create a source writing into `store`.
    #[must_use]
    pub fn new(config: ZmqSourceConfig, store: MessageStore) -> Self {
        Self::with_dialer(config, store, SubDialer)
    }
}

impl<D: Dialer> ZmqIngestSource<D> {
    /// Create a source opening its sockets with `dialer`.
    #[must_use]
    pub fn with_dialer(config: ZmqSourceConfig, store: MessageStore, dialer: D) -> Self {
        Self {
            config,
            store,
            dialer,
        }
    }

    /// Run until `shutdown` is cancelled, then release every socket.
    ///
    /// Every distinct endpoint gets its own task. A publisher that is down
    /// is dialed again after a pause and never holds up the others.
    ///
    /// # Errors
    ///
    /// Returns error if no endpoints are configured or none of them is a
    /// valid ZeroMQ address.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SourceError> {
        if self.config.endpoints.is_empty() {
            return Err(SourceError::NoEndpoints);
        }
        let endpoints = valid_endpoints(&self.config.endpoints);
        if endpoints.is_empty() {
            return Err(SourceError::InvalidEndpoints(self.config.endpoints.len()));
        }

        let timing = Timing::from(&self.config);
        let registry = Arc::new(SocketRegistry::with_dialer(self.dialer));
        let mut tasks = JoinSet::new();
        for endpoint in endpoints {
            tasks.spawn(subscribe_endpoint(
                endpoint,
                Arc::clone(&registry),
                self.store.clone(),
                shutdown.clone(),
                timing,
            ));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "ZeroMQ endpoint task failed");
            }
        }

        let released = registry.release();
        tracing::info!(sockets = released, "ZeroMQ ingest stopped");
        Ok(())
    }
}

/// Distinct, parseable endpoints in configuration order.
fn valid_endpoints(configured: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut endpoints = Vec::new();
    for endpoint in configured {
        if !seen.insert(endpoint.as_str()) {
            tracing::debug!(endpoint = %endpoint, "Duplicate endpoint ignored");
            continue;
        }
        match endpoint.parse::<Endpoint>() {
            Ok(_) => endpoints.push(endpoint.clone()),
            Err(e) => tracing::error!(
                endpoint = %endpoint,
                error = %e,
                "Invalid ZeroMQ endpoint"
            ),
        }
    }
    endpoints
}

/// How a receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReceiveEnd {
    Shutdown,
    Idle,
}

/// Keep one endpoint subscribed until shutdown.
async fn subscribe_endpoint<D: Dialer>(
    endpoint: String,
    registry: Arc<SocketRegistry<D>>,
    store: MessageStore,
    shutdown: CancellationToken,
    timing: Timing,
) {
    let mut socket = None;
    while !shutdown.is_cancelled() {
        let current = match socket.take() {
            Some(current) => current,
            None => match dial(&endpoint, &registry, None, &store, &shutdown, timing).await {
                Some(dialed) => {
                    tracing::info!(endpoint = %endpoint, "Subscribed to ZeroMQ publisher");
                    dialed
                }
                None => {
                    pause(timing.error_pause, &shutdown).await;
                    continue;
                }
            },
        };

        if receive_loop(&endpoint, &current, &store, &shutdown, timing).await
            == ReceiveEnd::Shutdown
        {
            break;
        }

        // The publisher may have restarted; a SUB socket does not notice.
        tracing::debug!(
            endpoint = %endpoint,
            idle_secs = timing.idle_timeout.as_secs_f64(),
            "No messages from ZeroMQ publisher, dialing again"
        );
        let replacement =
            dial(&endpoint, &registry, Some(&current), &store, &shutdown, timing).await;
        socket = Some(replacement.unwrap_or(current));
    }
    tracing::debug!(endpoint = %endpoint, "ZeroMQ endpoint stopped");
}

/// Dial `endpoint` within the connect timeout.
///
/// While the dial is pending, messages still arriving on `previous` are
/// ingested, so swapping sockets loses nothing. Returns `None` on failure,
/// timeout or shutdown.
async fn dial<D: Dialer>(
    endpoint: &str,
    registry: &SocketRegistry<D>,
    previous: Option<&SharedSocket<D::Socket>>,
    store: &MessageStore,
    shutdown: &CancellationToken,
    timing: Timing,
) -> Option<SharedSocket<D::Socket>> {
    let dialing = tokio::time::timeout(timing.connect_timeout, registry.dial(endpoint));
    tokio::pin!(dialing);

    let dialed = match previous {
        None => tokio::select! {
            biased;
            () = shutdown.cancelled() => return None,
            dialed = &mut dialing => dialed,
        },
        Some(previous) => {
            let mut previous = previous.lock().await;
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return None,
                    dialed = &mut dialing => break dialed,
                    received = previous.recv_frames() => {
                        if let Ok(frames) = received {
                            ingest_frames(store, &frames, Utc::now());
                        }
                    }
                }
            }
        }
    };

    match dialed {
        Ok(Ok(socket)) => Some(socket),
        Ok(Err(e)) => {
            tracing::warn!(endpoint = %endpoint, error = %e, "Failed to connect to ZeroMQ publisher");
            None
        }
        Err(_) => {
            tracing::warn!(
                endpoint = %endpoint,
                timeout_secs = timing.connect_timeout.as_secs_f64(),
                "Timed out connecting to ZeroMQ publisher"
            );
            None
        }
    }
}

async fn pause(duration: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        () = shutdown.cancelled() => {}
        () = tokio::time::sleep(duration) => {}
    }
}

/// Receive from one socket, ingesting every message, until shutdown or
/// until nothing has arrived for the idle timeout.
async fn receive_loop<S: FrameSubscriber>(
    endpoint: &str,
    socket: &SharedSocket<S>,
    store: &MessageStore,
    shutdown: &CancellationToken,
    timing: Timing,
) -> ReceiveEnd {
    let mut socket = socket.lock().await;
    let idle = tokio::time::sleep(timing.idle_timeout);
    tokio::pin!(idle);

    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => return ReceiveEnd::Shutdown,
            () = &mut idle => return ReceiveEnd::Idle,
            received = socket.recv_frames() => received,
        };

        match received {
            Ok(frames) => {
                ingest_frames(store, &frames, Utc::now());
                idle.as_mut().reset(Instant::now() + timing.idle_timeout);
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "ZeroMQ receive failed");
                pause(timing.error_pause, shutdown).await;
            }
        }
    }
}

/// Errors that stop the ZeroMQ source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// No publisher endpoints configured
    #[error("no ZeroMQ endpoints configured")]
    NoEndpoints,
    /// None of the configured endpoints is a valid address
    #[error("none of {0} ZeroMQ endpoint(s) is a valid address")]
    InvalidEndpoints(usize),
}
