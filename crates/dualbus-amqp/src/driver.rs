//! Per-connection I/O task.
//!
//! One driver owns the socket of one connection generation. It multiplexes
//! inbound frames, commands from channel and consumer handles, and the
//! heartbeat ticker. Handles talk to it through a [`Link`].

use crate::consumer::{Delivery, Inbound};
use crate::error::{CodecError, ProtocolError};
use crate::frame::{Frame, FramePayload, FrameReader, FrameWriter};
use crate::method::{BasicDeliver, Close, Method, MethodId, Tune};
use crate::properties::ContentHeader;
use crate::rpc::{Completion, RequestTable};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

/// Depth of the command queue between handles and the driver.
const COMMAND_QUEUE: usize = 100;

/// Requests from handles to the driver.
#[derive(Debug)]
pub(crate) enum Command {
    /// Reserve a channel id
    OpenChannel {
        notices: mpsc::UnboundedSender<Notice>,
        done: oneshot::Sender<Result<u16, ProtocolError>>,
    },
    /// Forget a channel that failed to open
    ReleaseChannel { channel: u16 },
    /// Send a method and wait for its reply
    Rpc {
        channel: u16,
        method: Method,
        expects: MethodId,
        done: Completion,
    },
    /// Send a method with no reply
    Send { channel: u16, method: Method },
    /// Route deliveries for a consumer tag
    RegisterConsumer {
        channel: u16,
        consumer_tag: String,
        inbound: mpsc::UnboundedSender<Inbound>,
    },
    /// Close the connection
    Close { done: Completion },
}

/// Driver-to-channel notifications.
#[derive(Debug)]
pub(crate) enum Notice {
    /// Broker closed the channel
    Closed { code: u16, text: String },
}

/// How a driver ended.
#[derive(Debug)]
pub(crate) enum DriverExit {
    /// Closed on request
    Closed,
    /// Socket, codec or broker failure
    Lost(ProtocolError),
}

/// Handle onto a running driver.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    commands: mpsc::Sender<Command>,
    rpc_timeout: Duration,
    generation: u64,
}

impl Link {
    /// Connection generation this link belongs to.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    async fn submit(&self, command: Command) -> Result<(), ProtocolError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ProtocolError::NotConnected)
    }

    async fn await_reply<T>(
        &self,
        reply: oneshot::Receiver<Result<T, ProtocolError>>,
    ) -> Result<T, ProtocolError> {
        match tokio::time::timeout(self.rpc_timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::NotConnected),
            Err(_) => Err(ProtocolError::Timeout(self.rpc_timeout)),
        }
    }

    /// Send `method` on `channel` and wait for a reply of type `expects`.
    pub(crate) async fn rpc(
        &self,
        channel: u16,
        method: Method,
        expects: MethodId,
    ) -> Result<Method, ProtocolError> {
        let (done, reply) = oneshot::channel();
        self.submit(Command::Rpc {
            channel,
            method,
            expects,
            done,
        })
        .await?;
        self.await_reply(reply).await
    }

    /// Send `method` on `channel` without waiting.
    pub(crate) async fn send(&self, channel: u16, method: Method) -> Result<(), ProtocolError> {
        self.submit(Command::Send { channel, method }).await
    }

    /// Reserve a channel id and its notice stream.
    pub(crate) async fn open_channel(
        &self,
    ) -> Result<(u16, mpsc::UnboundedReceiver<Notice>), ProtocolError> {
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let (done, reply) = oneshot::channel();
        self.submit(Command::OpenChannel {
            notices: notices_tx,
            done,
        })
        .await?;
        let channel = self.await_reply(reply).await?;
        Ok((channel, notices))
    }

    pub(crate) async fn release_channel(&self, channel: u16) {
        let _ = self.submit(Command::ReleaseChannel { channel }).await;
    }

    pub(crate) async fn register_consumer(
        &self,
        channel: u16,
        consumer_tag: String,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<(), ProtocolError> {
        self.submit(Command::RegisterConsumer {
            channel,
            consumer_tag,
            inbound,
        })
        .await
    }

    /// Send connection.close and wait for close-ok.
    pub(crate) async fn close(&self) -> Result<(), ProtocolError> {
        let (done, reply) = oneshot::channel();
        self.submit(Command::Close { done }).await?;
        self.await_reply(reply).await.map(|_| ())
    }
}

#[derive(Debug)]
struct ChannelSlot {
    notices: mpsc::UnboundedSender<Notice>,
    consumers: HashMap<String, mpsc::UnboundedSender<Inbound>>,
    partial: Option<PartialDelivery>,
}

#[derive(Debug)]
struct PartialDelivery {
    deliver: BasicDeliver,
    header: Option<ContentHeader>,
    body: BytesMut,
}

enum Wake {
    Frame(Result<Option<Frame>, ProtocolError>),
    Command(Option<Command>),
    Heartbeat,
}

enum Flow {
    Continue,
    Closed,
}

/// Owns one connection's socket.
pub(crate) struct Driver<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    commands: mpsc::Receiver<Command>,
    requests: RequestTable,
    channels: HashMap<u16, ChannelSlot>,
    tune: Tune,
    closing: bool,
}

impl<R, W> Driver<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Pair a negotiated socket with a new link.
    pub(crate) fn new(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        tune: Tune,
        rpc_timeout: Duration,
        generation: u64,
    ) -> (Link, Self) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let link = Link {
            commands: commands_tx,
            rpc_timeout,
            generation,
        };
        let driver = Self {
            reader,
            writer,
            commands,
            requests: RequestTable::new(),
            channels: HashMap::new(),
            tune,
            closing: false,
        };
        (link, driver)
    }

    /// Serve until closed or lost. Outstanding requests fail and every
    /// consumer stream ends when this returns.
    pub(crate) async fn run(mut self) -> DriverExit {
        let exit = match self.serve().await {
            Ok(()) => DriverExit::Closed,
            Err(e) => DriverExit::Lost(e),
        };

        let error = match &exit {
            DriverExit::Closed => ProtocolError::NotConnected,
            DriverExit::Lost(e) => e.clone(),
        };
        let failed = self.requests.fail_all(&error);
        if failed > 0 {
            tracing::debug!(failed, "Failed outstanding requests");
        }
        self.channels.clear();
        exit
    }

    async fn serve(&mut self) -> Result<(), ProtocolError> {
        let heartbeat = Duration::from_secs(u64::from(self.tune.heartbeat));
        let beating = !heartbeat.is_zero();
        let period = if beating {
            heartbeat / 2
        } else {
            Duration::from_secs(3600)
        };
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            let wake = tokio::select! {
                frame = self.reader.read_frame() => Wake::Frame(frame),
                command = self.commands.recv() => Wake::Command(command),
                _ = ticker.tick(), if beating => Wake::Heartbeat,
            };

            let flow = match wake {
                Wake::Frame(Ok(Some(frame))) => {
                    last_inbound = Instant::now();
                    self.on_frame(frame).await?
                }
                Wake::Frame(Ok(None)) if self.closing => Flow::Closed,
                Wake::Frame(Ok(None)) => {
                    return Err(ProtocolError::Io("broker closed the socket".to_string()))
                }
                Wake::Frame(Err(ProtocolError::Codec(CodecError::UnknownMethod {
                    class,
                    method,
                }))) => {
                    last_inbound = Instant::now();
                    tracing::warn!(class, method, "Ignoring unsupported method");
                    Flow::Continue
                }
                Wake::Frame(Err(e)) => return Err(e),
                Wake::Command(Some(command)) => self.on_command(command).await?,
                Wake::Command(None) => Flow::Closed,
                Wake::Heartbeat => {
                    if last_inbound.elapsed() > heartbeat * 2 {
                        return Err(ProtocolError::Io(format!(
                            "no traffic from broker for {}s",
                            last_inbound.elapsed().as_secs()
                        )));
                    }
                    self.writer.write_frame(&Frame::heartbeat()).await?;
                    Flow::Continue
                }
            };

            if let Flow::Closed = flow {
                return Ok(());
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Flow, ProtocolError> {
        let channel = frame.channel;
        match frame.payload {
            FramePayload::Heartbeat => {}
            FramePayload::Method(method) => return self.on_method(channel, method).await,
            FramePayload::Header(header) => self.on_header(channel, header).await?,
            FramePayload::Body(body) => self.on_body(channel, &body).await?,
        }
        Ok(Flow::Continue)
    }

    async fn on_method(&mut self, channel: u16, method: Method) -> Result<Flow, ProtocolError> {
        match method {
            Method::ConnectionClose(close) => {
                self.writer
                    .write_frame(&Frame::method(0, Method::ConnectionCloseOk))
                    .await?;
                if self.closing {
                    // Both sides closed at once.
                    self.requests.resolve(0, Method::ConnectionCloseOk);
                    return Ok(Flow::Closed);
                }
                tracing::warn!(
                    code = close.reply_code,
                    text = %close.reply_text,
                    "Broker closed the connection"
                );
                return Err(ProtocolError::ConnectionClosed {
                    code: close.reply_code,
                    text: close.reply_text,
                });
            }
            Method::ConnectionCloseOk => {
                self.requests.resolve(0, Method::ConnectionCloseOk);
                if self.closing {
                    return Ok(Flow::Closed);
                }
            }
            Method::ChannelClose(close) => self.on_channel_close(channel, close).await?,
            Method::ChannelCloseOk => {
                self.requests.resolve(channel, Method::ChannelCloseOk);
                self.channels.remove(&channel);
            }
            Method::BasicDeliver(deliver) => match self.channels.get_mut(&channel) {
                Some(slot) => {
                    slot.partial = Some(PartialDelivery {
                        deliver,
                        header: None,
                        body: BytesMut::new(),
                    });
                }
                None => tracing::warn!(channel, "Delivery on unknown channel ignored"),
            },
            Method::BasicCancel {
                consumer_tag,
                no_wait,
            } => {
                tracing::info!(channel, %consumer_tag, "Broker cancelled consumer");
                if let Some(inbound) = self
                    .channels
                    .get_mut(&channel)
                    .and_then(|slot| slot.consumers.remove(&consumer_tag))
                {
                    let _ = inbound.send(Inbound::Cancelled);
                }
                if !no_wait {
                    self.writer
                        .write_frame(&Frame::method(
                            channel,
                            Method::BasicCancelOk { consumer_tag },
                        ))
                        .await?;
                }
            }
            Method::BasicCancelOk { consumer_tag } => {
                if let Some(slot) = self.channels.get_mut(&channel) {
                    slot.consumers.remove(&consumer_tag);
                }
                self.requests
                    .resolve(channel, Method::BasicCancelOk { consumer_tag });
            }
            reply => {
                self.requests.resolve(channel, reply);
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_channel_close(&mut self, channel: u16, close: Close) -> Result<(), ProtocolError> {
        self.writer
            .write_frame(&Frame::method(channel, Method::ChannelCloseOk))
            .await?;

        if self.requests.awaiting(channel, MethodId::CHANNEL_CLOSE_OK) {
            // Both sides closed at once; ours is done.
            self.requests.resolve(channel, Method::ChannelCloseOk);
        } else {
            tracing::warn!(
                channel,
                code = close.reply_code,
                text = %close.reply_text,
                "Broker closed channel"
            );
        }

        let error = ProtocolError::ChannelClosed {
            channel,
            code: close.reply_code,
            text: close.reply_text.clone(),
        };
        self.requests.fail_channel(channel, &error);
        if let Some(slot) = self.channels.remove(&channel) {
            let _ = slot.notices.send(Notice::Closed {
                code: close.reply_code,
                text: close.reply_text,
            });
        }
        Ok(())
    }

    async fn on_header(&mut self, channel: u16, header: ContentHeader) -> Result<(), ProtocolError> {
        let Some(partial) = self
            .channels
            .get_mut(&channel)
            .and_then(|slot| slot.partial.as_mut())
            .filter(|partial| partial.header.is_none())
        else {
            tracing::warn!(channel, "Content header without a delivery ignored");
            return Ok(());
        };

        let complete = header.body_size == 0;
        partial.header = Some(header);
        if complete {
            self.finish_delivery(channel).await?;
        }
        Ok(())
    }

    async fn on_body(&mut self, channel: u16, body: &Bytes) -> Result<(), ProtocolError> {
        let Some(partial) = self
            .channels
            .get_mut(&channel)
            .and_then(|slot| slot.partial.as_mut())
        else {
            tracing::warn!(channel, "Body frame without a delivery ignored");
            return Ok(());
        };
        let Some(expected) = partial.header.as_ref().map(|header| header.body_size) else {
            tracing::warn!(channel, "Body frame before content header ignored");
            return Ok(());
        };

        partial.body.extend_from_slice(body);
        if partial.body.len() as u64 >= expected {
            self.finish_delivery(channel).await?;
        }
        Ok(())
    }

    async fn finish_delivery(&mut self, channel: u16) -> Result<(), ProtocolError> {
        let Some(slot) = self.channels.get_mut(&channel) else {
            return Ok(());
        };
        let Some(PartialDelivery {
            deliver,
            header: Some(header),
            body,
        }) = slot.partial.take()
        else {
            return Ok(());
        };

        let delivery_tag = deliver.delivery_tag;
        let routed = match slot.consumers.get(&deliver.consumer_tag) {
            Some(inbound) => inbound
                .send(Inbound::Delivery(Delivery {
                    delivery_tag,
                    consumer_tag: deliver.consumer_tag.clone(),
                    redelivered: deliver.redelivered,
                    exchange: deliver.exchange,
                    routing_key: deliver.routing_key,
                    properties: header.properties,
                    body: body.freeze(),
                }))
                .is_ok(),
            None => false,
        };

        if !routed {
            tracing::warn!(
                channel,
                delivery_tag,
                consumer_tag = %deliver.consumer_tag,
                "Delivery for unknown consumer, rejecting"
            );
            self.writer
                .write_frame(&Frame::method(
                    channel,
                    Method::BasicReject {
                        delivery_tag,
                        requeue: true,
                    },
                ))
                .await?;
        }
        Ok(())
    }

    async fn on_command(&mut self, command: Command) -> Result<Flow, ProtocolError> {
        match command {
            Command::OpenChannel { notices, done } => {
                let result = match self.free_channel() {
                    Some(channel) => {
                        self.channels.insert(
                            channel,
                            ChannelSlot {
                                notices,
                                consumers: HashMap::new(),
                                partial: None,
                            },
                        );
                        Ok(channel)
                    }
                    None => Err(ProtocolError::ChannelsExhausted),
                };
                let _ = done.send(result);
            }
            Command::ReleaseChannel { channel } => {
                self.channels.remove(&channel);
            }
            Command::Rpc {
                channel,
                method,
                expects,
                done,
            } => {
                if channel != 0 && !self.channels.contains_key(&channel) {
                    let _ = done.send(Err(ProtocolError::ChannelNotOpen(channel)));
                    return Ok(Flow::Continue);
                }
                self.requests.register(channel, expects, done);
                self.writer
                    .write_frame(&Frame::method(channel, method))
                    .await?;
            }
            Command::Send { channel, method } => {
                if self.channels.contains_key(&channel) {
                    self.writer
                        .write_frame(&Frame::method(channel, method))
                        .await?;
                } else {
                    tracing::debug!(channel, method = %method.id(), "Dropping method for closed channel");
                }
            }
            Command::RegisterConsumer {
                channel,
                consumer_tag,
                inbound,
            } => match self.channels.get_mut(&channel) {
                Some(slot) => {
                    slot.consumers.insert(consumer_tag, inbound);
                }
                None => tracing::debug!(channel, %consumer_tag, "Consumer on closed channel dropped"),
            },
            Command::Close { done } => {
                self.closing = true;
                self.requests
                    .register(0, MethodId::CONNECTION_CLOSE_OK, done);
                self.writer
                    .write_frame(&Frame::method(
                        0,
                        Method::ConnectionClose(Close::normal()),
                    ))
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    fn free_channel(&self) -> Option<u16> {
        let max = if self.tune.channel_max == 0 {
            u16::MAX
        } else {
            self.tune.channel_max
        };
        (1..=max).find(|channel| !self.channels.contains_key(channel))
    }
}
