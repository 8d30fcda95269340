//! Channels.

use crate::consumer::Consumer;
use crate::driver::{Link, Notice};
use crate::error::ProtocolError;
use crate::exchange::Exchange;
use crate::method::{Close, Method, MethodId, QueueBind};
use crate::queue::Queue;
use crate::state::{ChannelEvent, ChannelState};
use tokio::sync::mpsc::{self, error::TryRecvError};

/// A channel on an open connection.
///
/// Every operation waits for the broker's reply. Once the broker closes
/// the channel or the connection goes away, operations fail with
/// [`ProtocolError::ChannelNotOpen`].
#[derive(Debug)]
pub struct Channel {
    id: u16,
    link: Link,
    state: ChannelState,
    notices: mpsc::UnboundedReceiver<Notice>,
}

impl Channel {
    pub(crate) async fn open(link: Link) -> Result<Self, ProtocolError> {
        let (id, notices) = link.open_channel().await?;
        let mut channel = Self {
            id,
            link,
            state: ChannelState::Closed,
            notices,
        };

        channel.transition(ChannelEvent::Open);
        if let Err(e) = channel
            .link
            .rpc(id, Method::ChannelOpen, MethodId::CHANNEL_OPEN_OK)
            .await
        {
            channel.link.release_channel(id).await;
            return Err(e);
        }
        channel.transition(ChannelEvent::OpenOk);
        tracing::debug!(channel = id, "Channel opened");
        Ok(channel)
    }

    /// Channel id.
    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Current state, after applying any pending broker notices.
    pub fn state(&mut self) -> ChannelState {
        self.sync();
        self.state
    }

    fn transition(&mut self, event: ChannelEvent) {
        match self.state.on(event) {
            Some(next) => self.state = next,
            None => tracing::debug!(
                channel = self.id,
                state = ?self.state,
                ?event,
                "Ignoring channel event"
            ),
        }
    }

    fn sync(&mut self) {
        loop {
            match self.notices.try_recv() {
                Ok(Notice::Closed { code, text }) => {
                    tracing::debug!(channel = self.id, code, %text, "Channel closed by broker");
                    self.transition(ChannelEvent::ClosedByBroker);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.state != ChannelState::Closed {
                        self.transition(ChannelEvent::ConnectionLost);
                    }
                    break;
                }
            }
        }
    }

    async fn call(&mut self, method: Method, expects: MethodId) -> Result<Method, ProtocolError> {
        self.sync();
        if self.state != ChannelState::Open {
            return Err(ProtocolError::ChannelNotOpen(self.id));
        }
        let result = self.link.rpc(self.id, method, expects).await;
        if result.is_err() {
            self.sync();
        }
        result
    }

    /// Declare an exchange.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not open or the broker refuses the
    /// declaration (which also closes the channel).
    pub async fn declare_exchange(&mut self, exchange: &Exchange) -> Result<(), ProtocolError> {
        self.call(exchange.declare_method(), MethodId::EXCHANGE_DECLARE_OK)
            .await?;
        tracing::debug!(
            channel = self.id,
            exchange = %exchange.name,
            kind = %exchange.kind,
            "Exchange declared"
        );
        Ok(())
    }

    /// Declare a queue.
    ///
    /// Returns the queue under the name the broker confirmed, which is
    /// server-assigned when the requested name was empty.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not open or the broker refuses the
    /// declaration.
    pub async fn declare_queue(&mut self, queue: &Queue) -> Result<Queue, ProtocolError> {
        let reply = self
            .call(queue.declare_method(), MethodId::QUEUE_DECLARE_OK)
            .await?;
        let ok = match reply {
            Method::QueueDeclareOk(ok) => ok,
            other => return Err(ProtocolError::UnexpectedReply(other.id().to_string())),
        };
        tracing::debug!(
            channel = self.id,
            queue = %ok.queue,
            messages = ok.message_count,
            "Queue declared"
        );
        Ok(queue.named(ok.queue))
    }

    /// Bind a queue to an exchange with a routing key.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not open or the broker refuses the
    /// binding.
    pub async fn bind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), ProtocolError> {
        let method = Method::QueueBind(QueueBind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            no_wait: false,
            arguments: crate::codec::FieldTable::new(),
        });
        self.call(method, MethodId::QUEUE_BIND_OK).await?;
        tracing::debug!(channel = self.id, queue, exchange, routing_key, "Queue bound");
        Ok(())
    }

    /// Limit unacknowledged deliveries on this channel.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not open.
    pub async fn qos(&mut self, prefetch_count: u16) -> Result<(), ProtocolError> {
        self.call(
            Method::BasicQos {
                prefetch_size: 0,
                prefetch_count,
                global: false,
            },
            MethodId::BASIC_QOS_OK,
        )
        .await?;
        Ok(())
    }

    /// Start consuming from a queue.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not open or the broker refuses the
    /// consumer.
    pub async fn consume(&mut self, queue: &str) -> Result<Consumer, ProtocolError> {
        self.sync();
        if self.state != ChannelState::Open {
            return Err(ProtocolError::ChannelNotOpen(self.id));
        }
        Consumer::start(self.link.clone(), self.id, queue).await
    }

    /// Cancel a consumer by tag.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not open.
    pub async fn stop_consume(&mut self, consumer_tag: &str) -> Result<(), ProtocolError> {
        self.call(
            Method::BasicCancel {
                consumer_tag: consumer_tag.to_string(),
                no_wait: false,
            },
            MethodId::BASIC_CANCEL_OK,
        )
        .await?;
        Ok(())
    }

    /// Close the channel. A channel that is already closed is left alone.
    ///
    /// # Errors
    ///
    /// Returns error if the broker does not confirm the close.
    pub async fn close(mut self) -> Result<(), ProtocolError> {
        self.sync();
        if self.state != ChannelState::Open {
            return Ok(());
        }
        self.transition(ChannelEvent::Close);
        self.link
            .rpc(
                self.id,
                Method::ChannelClose(Close::normal()),
                MethodId::CHANNEL_CLOSE_OK,
            )
            .await?;
        self.transition(ChannelEvent::CloseOk);
        tracing::debug!(channel = self.id, "Channel closed");
        Ok(())
    }
}
