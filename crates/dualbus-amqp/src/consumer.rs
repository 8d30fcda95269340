//! Consumers and delivery handling.
//!
//! A [`Consumer`] receives deliveries for one queue and passes each to a
//! [`DeliveryHandler`]. Deliveries are acknowledged when the handler
//! succeeds and rejected with requeue when it fails, so the verifier sees
//! every message at least once.

use crate::driver::Link;
use crate::error::ProtocolError;
use crate::method::{BasicConsume, Method, MethodId};
use crate::properties::BasicProperties;
use crate::state::{ConsumerEvent, ConsumerState};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A message delivered to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge
    pub delivery_tag: u64,
    /// Consumer the broker delivered to
    pub consumer_tag: String,
    /// Delivered before and not acknowledged
    pub redelivered: bool,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key it was published with
    pub routing_key: String,
    /// Message properties
    pub properties: BasicProperties,
    /// Message body
    pub body: Bytes,
}

/// What the driver routes to a consumer.
#[derive(Debug)]
pub(crate) enum Inbound {
    Delivery(Delivery),
    Cancelled,
}

/// A delivery handler failure. The delivery is requeued.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// Processes deliveries for a consumer.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Handle one delivery.
    ///
    /// # Errors
    ///
    /// Returning an error rejects the delivery with requeue.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Why a consumer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Cancelled through the shutdown token
    Cancelled,
    /// Broker sent basic.cancel (queue deleted, node failure)
    ServerCancelled,
    /// Channel or connection went away
    ConnectionLost,
}

/// A started consumer on one queue.
#[derive(Debug)]
pub struct Consumer {
    tag: String,
    queue: String,
    channel: u16,
    link: Link,
    state: ConsumerState,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl Consumer {
    /// Register a tag with the driver, then send basic.consume.
    pub(crate) async fn start(link: Link, channel: u16, queue: &str) -> Result<Self, ProtocolError> {
        let tag = format!("dualbus-{}", Uuid::new_v4());
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        link.register_consumer(channel, tag.clone(), inbound_tx)
            .await?;

        let mut consumer = Self {
            tag,
            queue: queue.to_string(),
            channel,
            link,
            state: ConsumerState::Idle,
            inbound,
        };

        let reply = consumer
            .link
            .rpc(
                channel,
                Method::BasicConsume(BasicConsume {
                    queue: consumer.queue.clone(),
                    consumer_tag: consumer.tag.clone(),
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    no_wait: false,
                    arguments: crate::codec::FieldTable::new(),
                }),
                MethodId::BASIC_CONSUME_OK,
            )
            .await?;
        if let Method::BasicConsumeOk { consumer_tag } = &reply {
            if *consumer_tag != consumer.tag {
                return Err(ProtocolError::UnexpectedReply(format!(
                    "consume-ok for tag {consumer_tag}, expected {}",
                    consumer.tag
                )));
            }
        }
        consumer.transition(ConsumerEvent::ConsumeOk);

        tracing::debug!(
            channel,
            queue = %consumer.queue,
            consumer_tag = %consumer.tag,
            "Consumer started"
        );
        Ok(consumer)
    }

    /// Consumer tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Queue being consumed.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    fn transition(&mut self, event: ConsumerEvent) {
        match self.state.on(event) {
            Some(next) => self.state = next,
            None => tracing::debug!(
                consumer_tag = %self.tag,
                state = ?self.state,
                ?event,
                "Ignoring consumer event"
            ),
        }
    }

    /// Feed deliveries to `handler` until `shutdown` fires, the broker
    /// cancels the consumer, or the connection goes away.
    ///
    /// # Errors
    ///
    /// Returns error if the cancel handshake on shutdown fails.
    pub async fn run(
        mut self,
        handler: &dyn DeliveryHandler,
        shutdown: &CancellationToken,
    ) -> Result<ConsumerExit, ProtocolError> {
        loop {
            let inbound = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                inbound = self.inbound.recv() => inbound,
            };

            match inbound {
                Some(Inbound::Delivery(delivery)) => self.dispatch(handler, &delivery).await,
                Some(Inbound::Cancelled) => {
                    self.transition(ConsumerEvent::CancelledByBroker);
                    return Ok(ConsumerExit::ServerCancelled);
                }
                None => {
                    self.transition(ConsumerEvent::ConnectionLost);
                    tracing::debug!(consumer_tag = %self.tag, "Consumer stream ended");
                    return Ok(ConsumerExit::ConnectionLost);
                }
            }
        }
        self.cancel().await
    }

    async fn dispatch(&self, handler: &dyn DeliveryHandler, delivery: &Delivery) {
        let delivery_tag = delivery.delivery_tag;
        let settle = match handler.handle(delivery).await {
            Ok(()) => Method::BasicAck {
                delivery_tag,
                multiple: false,
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    delivery_tag,
                    routing_key = %delivery.routing_key,
                    "Failed to process delivery, requeueing"
                );
                Method::BasicNack {
                    delivery_tag,
                    multiple: false,
                    requeue: true,
                }
            }
        };
        // Unsettled deliveries are redelivered after a reconnect.
        if let Err(e) = self.link.send(self.channel, settle).await {
            tracing::debug!(error = %e, delivery_tag, "Could not settle delivery");
        }
    }

    /// Send basic.cancel, wait for cancel-ok, and requeue anything that
    /// was delivered in the meantime.
    async fn cancel(mut self) -> Result<ConsumerExit, ProtocolError> {
        self.transition(ConsumerEvent::Cancel);
        let result = self
            .link
            .rpc(
                self.channel,
                Method::BasicCancel {
                    consumer_tag: self.tag.clone(),
                    no_wait: false,
                },
                MethodId::BASIC_CANCEL_OK,
            )
            .await;

        // The driver stops routing to this tag on cancel-ok, so only
        // deliveries sent before it remain queued.
        let mut requeued = 0usize;
        while let Ok(inbound) = self.inbound.try_recv() {
            if let Inbound::Delivery(delivery) = inbound {
                let reject = Method::BasicReject {
                    delivery_tag: delivery.delivery_tag,
                    requeue: true,
                };
                if self.link.send(self.channel, reject).await.is_ok() {
                    requeued += 1;
                }
            }
        }

        match result {
            Ok(_) => {
                self.transition(ConsumerEvent::CancelOk);
                tracing::debug!(consumer_tag = %self.tag, requeued, "Consumer cancelled");
                Ok(ConsumerExit::Cancelled)
            }
            Err(ProtocolError::NotConnected) => {
                self.transition(ConsumerEvent::ConnectionLost);
                Ok(ConsumerExit::ConnectionLost)
            }
            Err(e) => {
                self.transition(ConsumerEvent::ConnectionLost);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::testing::{open_link, FakeBroker, Recorder};
    use std::sync::Arc;
    use std::time::Duration;

    async fn consuming(broker: &mut FakeBroker, channel: &mut Channel) -> Consumer {
        let (consumer, ()) = tokio::join!(
            async { channel.consume("verify").await.unwrap() },
            async {
                let (on, method) = broker.expect().await;
                let Method::BasicConsume(consume) = method else {
                    panic!("expected basic.consume, got {method:?}");
                };
                assert_eq!(consume.queue, "verify");
                assert!(!consume.no_ack);
                broker
                    .send(
                        on,
                        Method::BasicConsumeOk {
                            consumer_tag: consume.consumer_tag,
                        },
                    )
                    .await;
            }
        );
        consumer
    }

    #[tokio::test]
    async fn acks_success_and_requeues_failure() {
        let (link, mut broker, _driver) = open_link().await;
        let mut channel = FakeBroker::open_channel(&mut broker, link).await;
        let consumer = consuming(&mut broker, &mut channel).await;
        assert_eq!(consumer.state(), ConsumerState::Consuming);
        let tag = consumer.tag().to_string();

        let recorder = Arc::new(Recorder::failing_on("bad"));
        let shutdown = CancellationToken::new();
        let task = {
            let recorder = Arc::clone(&recorder);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(recorder.as_ref(), &shutdown).await })
        };

        broker
            .deliver(channel.id(), &tag, 1, "org.t", br#"{"msg_id": "good"}"#)
            .await;
        assert_eq!(
            broker.expect().await.1,
            Method::BasicAck {
                delivery_tag: 1,
                multiple: false
            }
        );

        broker.deliver(channel.id(), &tag, 2, "org.t", b"bad").await;
        assert_eq!(
            broker.expect().await.1,
            Method::BasicNack {
                delivery_tag: 2,
                multiple: false,
                requeue: true
            }
        );

        shutdown.cancel();
        let (on, method) = broker.expect().await;
        assert_eq!(
            method,
            Method::BasicCancel {
                consumer_tag: tag.clone(),
                no_wait: false
            }
        );
        broker
            .send(on, Method::BasicCancelOk { consumer_tag: tag })
            .await;

        let exit = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, ConsumerExit::Cancelled);
        assert_eq!(recorder.seen(), vec!["org.t".to_string(), "org.t".to_string()]);
    }

    #[tokio::test]
    async fn deliveries_while_cancelling_are_requeued() {
        let (link, mut broker, _driver) = open_link().await;
        let mut channel = FakeBroker::open_channel(&mut broker, link).await;
        let consumer = consuming(&mut broker, &mut channel).await;
        let tag = consumer.tag().to_string();

        let recorder = Recorder::failing_on("never");
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let (exit, ()) = tokio::join!(consumer.run(&recorder, &shutdown), async {
            let (on, method) = broker.expect().await;
            assert!(matches!(method, Method::BasicCancel { .. }));
            broker.deliver(on, &tag, 9, "org.t", b"{}").await;
            broker
                .send(on, Method::BasicCancelOk { consumer_tag: tag.clone() })
                .await;
        });

        assert_eq!(exit.unwrap(), ConsumerExit::Cancelled);
        assert_eq!(
            broker.expect().await.1,
            Method::BasicReject {
                delivery_tag: 9,
                requeue: true
            }
        );
        assert!(recorder.seen().is_empty());
    }

    #[tokio::test]
    async fn broker_cancel_stops_consumer() {
        let (link, mut broker, _driver) = open_link().await;
        let mut channel = FakeBroker::open_channel(&mut broker, link).await;
        let consumer = consuming(&mut broker, &mut channel).await;
        let tag = consumer.tag().to_string();

        let recorder = Recorder::failing_on("never");
        let shutdown = CancellationToken::new();

        let (exit, ()) = tokio::join!(consumer.run(&recorder, &shutdown), async {
            broker
                .send(
                    channel.id(),
                    Method::BasicCancel {
                        consumer_tag: tag.clone(),
                        no_wait: false,
                    },
                )
                .await;
        });

        assert_eq!(exit.unwrap(), ConsumerExit::ServerCancelled);
        assert_eq!(
            broker.expect().await.1,
            Method::BasicCancelOk { consumer_tag: tag }
        );
    }

    #[tokio::test]
    async fn connection_loss_ends_consumer() {
        let (link, mut broker, _driver) = open_link().await;
        let mut channel = FakeBroker::open_channel(&mut broker, link).await;
        let consumer = consuming(&mut broker, &mut channel).await;

        drop(broker);
        let recorder = Recorder::failing_on("never");
        let exit = consumer
            .run(&recorder, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exit, ConsumerExit::ConnectionLost);
    }

    #[tokio::test]
    async fn unknown_consumer_tag_is_rejected() {
        let (link, mut broker, _driver) = open_link().await;
        let channel = FakeBroker::open_channel(&mut broker, link).await;

        broker.deliver(channel.id(), "nobody", 5, "org.t", b"{}").await;
        assert_eq!(
            broker.expect().await.1,
            Method::BasicReject {
                delivery_tag: 5,
                requeue: true
            }
        );
    }
}
