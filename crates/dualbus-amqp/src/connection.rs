//! Connections and the reconnecting supervisor.
//!
//! A [`Connection`] is a handle onto a supervisor task that feeds events
//! into the [`ConnectionState`] machine and performs the actions it
//! returns. Each successful dial starts a new generation with its own I/O
//! driver; when a generation is lost unexpectedly the supervisor dials
//! again after the configured reconnect delay.

use crate::channel::Channel;
use crate::driver::{Driver, DriverExit, Link};
use crate::error::ProtocolError;
use crate::frame::{FrameReader, FrameWriter};
use crate::handshake::handshake;
use crate::params::ConnectionParams;
use crate::state::{ConnectionAction, ConnectionEvent, ConnectionState};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

type TcpDriver = Driver<OwnedReadHalf, OwnedWriteHalf>;

/// Negotiate a connection over an already connected byte stream.
pub(crate) async fn establish<R, W>(
    read: R,
    write: W,
    params: &ConnectionParams,
    generation: u64,
) -> Result<(Link, Driver<R, W>), ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FrameReader::new(read);
    let mut writer = FrameWriter::new(write);
    let tune = tokio::time::timeout(
        params.connect_timeout,
        handshake(&mut reader, &mut writer, params),
    )
    .await
    .map_err(|_| ProtocolError::Timeout(params.connect_timeout))??;

    Ok(Driver::new(
        reader,
        writer,
        tune,
        params.rpc_timeout,
        generation,
    ))
}

async fn dial(
    params: &ConnectionParams,
    generation: u64,
) -> Result<(Link, TcpDriver), ProtocolError> {
    let stream = tokio::time::timeout(
        params.connect_timeout,
        TcpStream::connect((params.host.as_str(), params.port)),
    )
    .await
    .map_err(|_| ProtocolError::Timeout(params.connect_timeout))??;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    establish(read, write, params, generation).await
}

/// Inputs to the supervisor.
enum Signal {
    Connect(oneshot::Sender<Result<(), ProtocolError>>),
    Opened(Link, TcpDriver),
    DialFailed(ProtocolError),
    LinkEnded { generation: u64, exit: DriverExit },
    RetryElapsed,
    Close,
}

struct Supervisor {
    params: ConnectionParams,
    state: ConnectionState,
    generation: u64,
    driver: Option<JoinHandle<()>>,
    first_outcome: Option<oneshot::Sender<Result<(), ProtocolError>>>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals: mpsc::UnboundedReceiver<Signal>,
    state_tx: watch::Sender<ConnectionState>,
    link_tx: watch::Sender<Option<Link>>,
}

impl Supervisor {
    async fn run(mut self) {
        while let Some(signal) = self.signals.recv().await {
            let Some(event) = self.accept(signal) else {
                continue;
            };

            let transition = self.state.on(event);
            if !transition.accepted {
                tracing::debug!(state = %self.state, ?event, "Ignoring connection event");
                continue;
            }
            if transition.next != self.state {
                tracing::debug!(from = %self.state, to = %transition.next, ?event, "Connection state changed");
            }
            self.state = transition.next;

            for action in transition.actions {
                self.perform(*action);
            }
            self.state_tx.send_replace(self.state);

            if self.state == ConnectionState::Closed {
                break;
            }
        }
        self.release();
    }

    /// Map a signal to a state-machine event, updating bookkeeping.
    fn accept(&mut self, signal: Signal) -> Option<ConnectionEvent> {
        match signal {
            Signal::Connect(outcome) => {
                self.first_outcome = Some(outcome);
                Some(ConnectionEvent::ConnectRequested)
            }
            Signal::Opened(link, driver) => {
                if !matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Closing
                ) {
                    return None;
                }
                tracing::info!(
                    address = %self.params.address(),
                    vhost = %self.params.vhost,
                    generation = link.generation(),
                    "Connected to AMQP broker"
                );
                self.spawn_driver(link.generation(), driver);
                // Link before state, so anyone seeing Open can use it.
                self.link_tx.send_replace(Some(link));
                if let Some(outcome) = self.first_outcome.take() {
                    let _ = outcome.send(Ok(()));
                }
                Some(ConnectionEvent::Opened)
            }
            Signal::DialFailed(error) => {
                match self.first_outcome.take() {
                    Some(outcome) => {
                        let _ = outcome.send(Err(error));
                    }
                    None => tracing::warn!(
                        address = %self.params.address(),
                        error = %error,
                        retry_in_secs = self.params.reconnect_delay.as_secs_f64(),
                        "AMQP connection attempt failed"
                    ),
                }
                Some(ConnectionEvent::DialFailed)
            }
            Signal::LinkEnded { generation, exit } => {
                if generation != self.generation {
                    tracing::debug!(generation, "Ignoring end of stale connection");
                    return None;
                }
                match exit {
                    DriverExit::Closed if self.state == ConnectionState::Closing => {
                        Some(ConnectionEvent::CloseCompleted)
                    }
                    DriverExit::Closed => Some(ConnectionEvent::Lost),
                    DriverExit::Lost(error) => {
                        if self.state == ConnectionState::Open {
                            tracing::warn!(
                                error = %error,
                                retry_in_secs = self.params.reconnect_delay.as_secs_f64(),
                                "AMQP connection lost"
                            );
                        }
                        Some(ConnectionEvent::Lost)
                    }
                }
            }
            Signal::RetryElapsed => Some(ConnectionEvent::RetryElapsed),
            Signal::Close => Some(ConnectionEvent::CloseRequested),
        }
    }

    fn perform(&mut self, action: ConnectionAction) {
        match action {
            ConnectionAction::Dial => {
                self.generation += 1;
                let generation = self.generation;
                let params = self.params.clone();
                let signals = self.signals_tx.clone();
                tokio::spawn(async move {
                    let signal = match dial(&params, generation).await {
                        Ok((link, driver)) => Signal::Opened(link, driver),
                        Err(e) => Signal::DialFailed(e),
                    };
                    let _ = signals.send(signal);
                });
            }
            ConnectionAction::ScheduleReconnect => {
                let delay = self.params.reconnect_delay;
                let signals = self.signals_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = signals.send(Signal::RetryElapsed);
                });
            }
            ConnectionAction::SendClose => {
                let Some(link) = self.link_tx.borrow().clone() else {
                    return;
                };
                let signals = self.signals_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = link.close().await {
                        // The driver may still be running; force the close.
                        tracing::debug!(error = %e, "Close handshake failed");
                        let _ = signals.send(Signal::LinkEnded {
                            generation: link.generation(),
                            exit: DriverExit::Lost(e),
                        });
                    }
                });
            }
            ConnectionAction::Release => self.release(),
        }
    }

    fn spawn_driver(&mut self, generation: u64, driver: TcpDriver) {
        let signals = self.signals_tx.clone();
        self.driver = Some(tokio::spawn(async move {
            let exit = driver.run().await;
            let _ = signals.send(Signal::LinkEnded { generation, exit });
        }));
    }

    fn release(&mut self) {
        self.link_tx.send_replace(None);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// A reconnecting connection to an AMQP broker.
///
/// Dropping the handle closes the connection in the background.
#[derive(Debug)]
pub struct Connection {
    signals: mpsc::UnboundedSender<Signal>,
    state: watch::Receiver<ConnectionState>,
    link: watch::Receiver<Option<Link>>,
    supervisor: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect(_) => "Connect",
            Self::Opened(..) => "Opened",
            Self::DialFailed(_) => "DialFailed",
            Self::LinkEnded { .. } => "LinkEnded",
            Self::RetryElapsed => "RetryElapsed",
            Self::Close => "Close",
        };
        f.write_str(name)
    }
}

impl Connection {
    /// Dial and negotiate. Later losses are repaired in the background.
    ///
    /// # Errors
    ///
    /// Returns error if the first dial or handshake fails.
    pub async fn connect(params: ConnectionParams) -> Result<Self, ProtocolError> {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (link_tx, link) = watch::channel(None);

        let supervisor = Supervisor {
            params,
            state: ConnectionState::Disconnected,
            generation: 0,
            driver: None,
            first_outcome: None,
            signals_tx: signals_tx.clone(),
            signals,
            state_tx,
            link_tx,
        };
        let connection = Self {
            signals: signals_tx,
            state,
            link,
            supervisor: Some(tokio::spawn(supervisor.run())),
        };

        let (outcome_tx, outcome) = oneshot::channel();
        let _ = connection.signals.send(Signal::Connect(outcome_tx));
        match outcome.await {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(e)) => {
                connection.close().await;
                Err(e)
            }
            Err(_) => Err(ProtocolError::NotConnected),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait for the next time the connection is open.
    ///
    /// # Errors
    ///
    /// Returns error if the connection closes first.
    pub async fn wait_open(&self) -> Result<(), ProtocolError> {
        let mut state = self.state.clone();
        let reached = *state
            .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed))
            .await
            .map_err(|_| ProtocolError::NotConnected)?;
        if reached == ConnectionState::Open {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }

    /// Wait for the connection to stop being open, e.g. after a loss.
    pub async fn wait_lost(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s != ConnectionState::Open).await;
    }

    /// Open a channel, waiting for the connection to be open first.
    ///
    /// # Errors
    ///
    /// Returns error if the connection closes or the broker refuses the
    /// channel.
    pub async fn open_channel(&self) -> Result<Channel, ProtocolError> {
        self.wait_open().await?;
        let link = self
            .link
            .borrow()
            .clone()
            .ok_or(ProtocolError::NotConnected)?;
        Channel::open(link).await
    }

    /// Close the connection and stop reconnecting.
    pub async fn close(mut self) {
        let _ = self.signals.send(Signal::Close);
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
        tracing::debug!("AMQP connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.signals.send(Signal::Close);
    }
}
