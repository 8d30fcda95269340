//! AMQP 0-9-1 methods used by the client.
//!
//! Only the connection, channel, exchange, queue and basic methods a
//! consuming client exchanges with a broker are modelled. Anything else
//! decodes to [`CodecError::UnknownMethod`].

use crate::codec::{bit, pack_bits, put_longstr, put_shortstr, put_table, Decoder, FieldTable};
use crate::error::CodecError;
use bytes::{BufMut, BytesMut};

/// Class and method id pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId {
    /// Class id
    pub class: u16,
    /// Method id within the class
    pub method: u16,
}

impl MethodId {
    const fn new(class: u16, method: u16) -> Self {
        Self { class, method }
    }

    /// connection.start
    pub const CONNECTION_START: Self = Self::new(10, 10);
    /// connection.start-ok
    pub const CONNECTION_START_OK: Self = Self::new(10, 11);
    /// connection.tune
    pub const CONNECTION_TUNE: Self = Self::new(10, 30);
    /// connection.tune-ok
    pub const CONNECTION_TUNE_OK: Self = Self::new(10, 31);
    /// connection.open
    pub const CONNECTION_OPEN: Self = Self::new(10, 40);
    /// connection.open-ok
    pub const CONNECTION_OPEN_OK: Self = Self::new(10, 41);
    /// connection.close
    pub const CONNECTION_CLOSE: Self = Self::new(10, 50);
    /// connection.close-ok
    pub const CONNECTION_CLOSE_OK: Self = Self::new(10, 51);
    /// channel.open
    pub const CHANNEL_OPEN: Self = Self::new(20, 10);
    /// channel.open-ok
    pub const CHANNEL_OPEN_OK: Self = Self::new(20, 11);
    /// channel.close
    pub const CHANNEL_CLOSE: Self = Self::new(20, 40);
    /// channel.close-ok
    pub const CHANNEL_CLOSE_OK: Self = Self::new(20, 41);
    /// exchange.declare
    pub const EXCHANGE_DECLARE: Self = Self::new(40, 10);
    /// exchange.declare-ok
    pub const EXCHANGE_DECLARE_OK: Self = Self::new(40, 11);
    /// queue.declare
    pub const QUEUE_DECLARE: Self = Self::new(50, 10);
    /// queue.declare-ok
    pub const QUEUE_DECLARE_OK: Self = Self::new(50, 11);
    /// queue.bind
    pub const QUEUE_BIND: Self = Self::new(50, 20);
    /// queue.bind-ok
    pub const QUEUE_BIND_OK: Self = Self::new(50, 21);
    /// basic.qos
    pub const BASIC_QOS: Self = Self::new(60, 10);
    /// basic.qos-ok
    pub const BASIC_QOS_OK: Self = Self::new(60, 11);
    /// basic.consume
    pub const BASIC_CONSUME: Self = Self::new(60, 20);
    /// basic.consume-ok
    pub const BASIC_CONSUME_OK: Self = Self::new(60, 21);
    /// basic.cancel
    pub const BASIC_CANCEL: Self = Self::new(60, 30);
    /// basic.cancel-ok
    pub const BASIC_CANCEL_OK: Self = Self::new(60, 31);
    /// basic.deliver
    pub const BASIC_DELIVER: Self = Self::new(60, 60);
    /// basic.ack
    pub const BASIC_ACK: Self = Self::new(60, 80);
    /// basic.reject
    pub const BASIC_REJECT: Self = Self::new(60, 90);
    /// basic.nack
    pub const BASIC_NACK: Self = Self::new(60, 120);
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.class, self.method)
    }
}

/// connection.start arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStart {
    /// Protocol major version
    pub version_major: u8,
    /// Protocol minor version
    pub version_minor: u8,
    /// Broker properties
    pub server_properties: FieldTable,
    /// Space-separated SASL mechanisms
    pub mechanisms: Vec<u8>,
    /// Space-separated locales
    pub locales: Vec<u8>,
}

/// connection.start-ok arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStartOk {
    /// Client properties and capabilities
    pub client_properties: FieldTable,
    /// Selected SASL mechanism
    pub mechanism: String,
    /// SASL response
    pub response: Vec<u8>,
    /// Selected locale
    pub locale: String,
}

/// connection.tune and connection.tune-ok arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tune {
    /// Highest channel id (0 for no limit)
    pub channel_max: u16,
    /// Largest frame in bytes (0 for no limit)
    pub frame_max: u32,
    /// Heartbeat period in seconds (0 to disable)
    pub heartbeat: u16,
}

/// connection.close and channel.close arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    /// Reply code
    pub reply_code: u16,
    /// Reply text
    pub reply_text: String,
    /// Class of the failing method, if any
    pub class_id: u16,
    /// Failing method, if any
    pub method_id: u16,
}

impl Close {
    /// A normal (200) close.
    #[must_use]
    pub fn normal() -> Self {
        Self {
            reply_code: 200,
            reply_text: "Normal shutdown".to_string(),
            class_id: 0,
            method_id: 0,
        }
    }
}

/// exchange.declare arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDeclare {
    /// Exchange name
    pub exchange: String,
    /// Exchange type
    pub kind: String,
    /// Only check that the exchange exists
    pub passive: bool,
    /// Survive broker restarts
    pub durable: bool,
    /// Delete when the last binding goes away
    pub auto_delete: bool,
    /// Not publishable by clients
    pub internal: bool,
    /// Do not send declare-ok
    pub no_wait: bool,
    /// Extra arguments
    pub arguments: FieldTable,
}

/// queue.declare arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDeclare {
    /// Queue name (empty for server-named)
    pub queue: String,
    /// Only check that the queue exists
    pub passive: bool,
    /// Survive broker restarts
    pub durable: bool,
    /// Owned by this connection
    pub exclusive: bool,
    /// Delete when the last consumer goes away
    pub auto_delete: bool,
    /// Do not send declare-ok
    pub no_wait: bool,
    /// Extra arguments
    pub arguments: FieldTable,
}

/// queue.declare-ok arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclareOk {
    /// Declared (possibly server-assigned) name
    pub queue: String,
    /// Ready messages
    pub message_count: u32,
    /// Active consumers
    pub consumer_count: u32,
}

/// queue.bind arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueBind {
    /// Queue to bind
    pub queue: String,
    /// Source exchange
    pub exchange: String,
    /// Routing key pattern
    pub routing_key: String,
    /// Do not send bind-ok
    pub no_wait: bool,
    /// Extra arguments
    pub arguments: FieldTable,
}

/// basic.consume arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicConsume {
    /// Queue to consume from
    pub queue: String,
    /// Client-chosen consumer tag
    pub consumer_tag: String,
    /// Skip messages published on this connection
    pub no_local: bool,
    /// Broker considers messages acknowledged on delivery
    pub no_ack: bool,
    /// Sole consumer of the queue
    pub exclusive: bool,
    /// Do not send consume-ok
    pub no_wait: bool,
    /// Extra arguments
    pub arguments: FieldTable,
}

/// basic.deliver arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicDeliver {
    /// Consumer the message is for
    pub consumer_tag: String,
    /// Channel-scoped delivery tag
    pub delivery_tag: u64,
    /// Delivered before and not acknowledged
    pub redelivered: bool,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key it was published with
    pub routing_key: String,
}

/// A decoded method frame payload.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Method {
    ConnectionStart(ConnectionStart),
    ConnectionStartOk(ConnectionStartOk),
    ConnectionTune(Tune),
    ConnectionTuneOk(Tune),
    ConnectionOpen { virtual_host: String },
    ConnectionOpenOk,
    ConnectionClose(Close),
    ConnectionCloseOk,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose(Close),
    ChannelCloseOk,
    ExchangeDeclare(ExchangeDeclare),
    ExchangeDeclareOk,
    QueueDeclare(QueueDeclare),
    QueueDeclareOk(QueueDeclareOk),
    QueueBind(QueueBind),
    QueueBindOk,
    BasicQos {
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    },
    BasicQosOk,
    BasicConsume(BasicConsume),
    BasicConsumeOk { consumer_tag: String },
    BasicCancel { consumer_tag: String, no_wait: bool },
    BasicCancelOk { consumer_tag: String },
    BasicDeliver(BasicDeliver),
    BasicAck { delivery_tag: u64, multiple: bool },
    BasicReject { delivery_tag: u64, requeue: bool },
    BasicNack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
}

impl Method {
    /// The method's class and method id.
    #[must_use]
    pub fn id(&self) -> MethodId {
        match self {
            Self::ConnectionStart(_) => MethodId::CONNECTION_START,
            Self::ConnectionStartOk(_) => MethodId::CONNECTION_START_OK,
            Self::ConnectionTune(_) => MethodId::CONNECTION_TUNE,
            Self::ConnectionTuneOk(_) => MethodId::CONNECTION_TUNE_OK,
            Self::ConnectionOpen { .. } => MethodId::CONNECTION_OPEN,
            Self::ConnectionOpenOk => MethodId::CONNECTION_OPEN_OK,
            Self::ConnectionClose(_) => MethodId::CONNECTION_CLOSE,
            Self::ConnectionCloseOk => MethodId::CONNECTION_CLOSE_OK,
            Self::ChannelOpen => MethodId::CHANNEL_OPEN,
            Self::ChannelOpenOk => MethodId::CHANNEL_OPEN_OK,
            Self::ChannelClose(_) => MethodId::CHANNEL_CLOSE,
            Self::ChannelCloseOk => MethodId::CHANNEL_CLOSE_OK,
            Self::ExchangeDeclare(_) => MethodId::EXCHANGE_DECLARE,
            Self::ExchangeDeclareOk => MethodId::EXCHANGE_DECLARE_OK,
            Self::QueueDeclare(_) => MethodId::QUEUE_DECLARE,
            Self::QueueDeclareOk(_) => MethodId::QUEUE_DECLARE_OK,
            Self::QueueBind(_) => MethodId::QUEUE_BIND,
            Self::QueueBindOk => MethodId::QUEUE_BIND_OK,
            Self::BasicQos { .. } => MethodId::BASIC_QOS,
            Self::BasicQosOk => MethodId::BASIC_QOS_OK,
            Self::BasicConsume(_) => MethodId::BASIC_CONSUME,
            Self::BasicConsumeOk { .. } => MethodId::BASIC_CONSUME_OK,
            Self::BasicCancel { .. } => MethodId::BASIC_CANCEL,
            Self::BasicCancelOk { .. } => MethodId::BASIC_CANCEL_OK,
            Self::BasicDeliver(_) => MethodId::BASIC_DELIVER,
            Self::BasicAck { .. } => MethodId::BASIC_ACK,
            Self::BasicReject { .. } => MethodId::BASIC_REJECT,
            Self::BasicNack { .. } => MethodId::BASIC_NACK,
        }
    }

    /// Encode class id, method id and arguments.
    ///
    /// # Errors
    ///
    /// Returns error if a string argument exceeds its wire limit.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let id = self.id();
        buf.put_u16(id.class);
        buf.put_u16(id.method);

        match self {
            Self::ConnectionStart(start) => {
                buf.put_u8(start.version_major);
                buf.put_u8(start.version_minor);
                put_table(buf, &start.server_properties)?;
                put_longstr(buf, &start.mechanisms)?;
                put_longstr(buf, &start.locales)?;
            }
            Self::ConnectionStartOk(start_ok) => {
                put_table(buf, &start_ok.client_properties)?;
                put_shortstr(buf, &start_ok.mechanism)?;
                put_longstr(buf, &start_ok.response)?;
                put_shortstr(buf, &start_ok.locale)?;
            }
            Self::ConnectionTune(tune) | Self::ConnectionTuneOk(tune) => {
                buf.put_u16(tune.channel_max);
                buf.put_u32(tune.frame_max);
                buf.put_u16(tune.heartbeat);
            }
            Self::ConnectionOpen { virtual_host } => {
                put_shortstr(buf, virtual_host)?;
                put_shortstr(buf, "")?;
                buf.put_u8(0);
            }
            Self::ConnectionOpenOk => put_shortstr(buf, "")?,
            Self::ConnectionClose(close) | Self::ChannelClose(close) => {
                buf.put_u16(close.reply_code);
                put_shortstr(buf, &close.reply_text)?;
                buf.put_u16(close.class_id);
                buf.put_u16(close.method_id);
            }
            Self::ChannelOpen => put_shortstr(buf, "")?,
            Self::ChannelOpenOk => put_longstr(buf, b"")?,
            Self::ConnectionCloseOk
            | Self::ChannelCloseOk
            | Self::ExchangeDeclareOk
            | Self::QueueBindOk
            | Self::BasicQosOk => {}
            Self::ExchangeDeclare(declare) => {
                buf.put_u16(0);
                put_shortstr(buf, &declare.exchange)?;
                put_shortstr(buf, &declare.kind)?;
                buf.put_u8(pack_bits(&[
                    declare.passive,
                    declare.durable,
                    declare.auto_delete,
                    declare.internal,
                    declare.no_wait,
                ]));
                put_table(buf, &declare.arguments)?;
            }
            Self::QueueDeclare(declare) => {
                buf.put_u16(0);
                put_shortstr(buf, &declare.queue)?;
                buf.put_u8(pack_bits(&[
                    declare.passive,
                    declare.durable,
                    declare.exclusive,
                    declare.auto_delete,
                    declare.no_wait,
                ]));
                put_table(buf, &declare.arguments)?;
            }
            Self::QueueDeclareOk(ok) => {
                put_shortstr(buf, &ok.queue)?;
                buf.put_u32(ok.message_count);
                buf.put_u32(ok.consumer_count);
            }
            Self::QueueBind(bind) => {
                buf.put_u16(0);
                put_shortstr(buf, &bind.queue)?;
                put_shortstr(buf, &bind.exchange)?;
                put_shortstr(buf, &bind.routing_key)?;
                buf.put_u8(pack_bits(&[bind.no_wait]));
                put_table(buf, &bind.arguments)?;
            }
            Self::BasicQos {
                prefetch_size,
                prefetch_count,
                global,
            } => {
                buf.put_u32(*prefetch_size);
                buf.put_u16(*prefetch_count);
                buf.put_u8(pack_bits(&[*global]));
            }
            Self::BasicConsume(consume) => {
                buf.put_u16(0);
                put_shortstr(buf, &consume.queue)?;
                put_shortstr(buf, &consume.consumer_tag)?;
                buf.put_u8(pack_bits(&[
                    consume.no_local,
                    consume.no_ack,
                    consume.exclusive,
                    consume.no_wait,
                ]));
                put_table(buf, &consume.arguments)?;
            }
            Self::BasicConsumeOk { consumer_tag } | Self::BasicCancelOk { consumer_tag } => {
                put_shortstr(buf, consumer_tag)?;
            }
            Self::BasicCancel {
                consumer_tag,
                no_wait,
            } => {
                put_shortstr(buf, consumer_tag)?;
                buf.put_u8(pack_bits(&[*no_wait]));
            }
            Self::BasicDeliver(deliver) => {
                put_shortstr(buf, &deliver.consumer_tag)?;
                buf.put_u64(deliver.delivery_tag);
                buf.put_u8(pack_bits(&[deliver.redelivered]));
                put_shortstr(buf, &deliver.exchange)?;
                put_shortstr(buf, &deliver.routing_key)?;
            }
            Self::BasicAck {
                delivery_tag,
                multiple,
            } => {
                buf.put_u64(*delivery_tag);
                buf.put_u8(pack_bits(&[*multiple]));
            }
            Self::BasicReject {
                delivery_tag,
                requeue,
            } => {
                buf.put_u64(*delivery_tag);
                buf.put_u8(pack_bits(&[*requeue]));
            }
            Self::BasicNack {
                delivery_tag,
                multiple,
                requeue,
            } => {
                buf.put_u64(*delivery_tag);
                buf.put_u8(pack_bits(&[*multiple, *requeue]));
            }
        }
        Ok(())
    }

    /// Decode a method frame payload.
    ///
    /// # Errors
    ///
    /// Returns error on truncated arguments or a method this client does
    /// not know.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut d = Decoder::new(payload);
        let id = MethodId {
            class: d.u16()?,
            method: d.u16()?,
        };

        let method = match id {
            MethodId::CONNECTION_START => Self::ConnectionStart(ConnectionStart {
                version_major: d.u8()?,
                version_minor: d.u8()?,
                server_properties: d.table()?,
                mechanisms: d.longstr()?,
                locales: d.longstr()?,
            }),
            MethodId::CONNECTION_START_OK => Self::ConnectionStartOk(ConnectionStartOk {
                client_properties: d.table()?,
                mechanism: d.shortstr()?,
                response: d.longstr()?,
                locale: d.shortstr()?,
            }),
            MethodId::CONNECTION_TUNE => Self::ConnectionTune(decode_tune(&mut d)?),
            MethodId::CONNECTION_TUNE_OK => Self::ConnectionTuneOk(decode_tune(&mut d)?),
            MethodId::CONNECTION_OPEN => {
                let virtual_host = d.shortstr()?;
                d.shortstr()?;
                d.u8()?;
                Self::ConnectionOpen { virtual_host }
            }
            MethodId::CONNECTION_OPEN_OK => {
                d.shortstr()?;
                Self::ConnectionOpenOk
            }
            MethodId::CONNECTION_CLOSE => Self::ConnectionClose(decode_close(&mut d)?),
            MethodId::CONNECTION_CLOSE_OK => Self::ConnectionCloseOk,
            MethodId::CHANNEL_OPEN => {
                d.shortstr()?;
                Self::ChannelOpen
            }
            MethodId::CHANNEL_OPEN_OK => {
                d.longstr()?;
                Self::ChannelOpenOk
            }
            MethodId::CHANNEL_CLOSE => Self::ChannelClose(decode_close(&mut d)?),
            MethodId::CHANNEL_CLOSE_OK => Self::ChannelCloseOk,
            MethodId::EXCHANGE_DECLARE => {
                d.u16()?;
                let exchange = d.shortstr()?;
                let kind = d.shortstr()?;
                let flags = d.u8()?;
                Self::ExchangeDeclare(ExchangeDeclare {
                    exchange,
                    kind,
                    passive: bit(flags, 0),
                    durable: bit(flags, 1),
                    auto_delete: bit(flags, 2),
                    internal: bit(flags, 3),
                    no_wait: bit(flags, 4),
                    arguments: d.table()?,
                })
            }
            MethodId::EXCHANGE_DECLARE_OK => Self::ExchangeDeclareOk,
            MethodId::QUEUE_DECLARE => {
                d.u16()?;
                let queue = d.shortstr()?;
                let flags = d.u8()?;
                Self::QueueDeclare(QueueDeclare {
                    queue,
                    passive: bit(flags, 0),
                    durable: bit(flags, 1),
                    exclusive: bit(flags, 2),
                    auto_delete: bit(flags, 3),
                    no_wait: bit(flags, 4),
                    arguments: d.table()?,
                })
            }
            MethodId::QUEUE_DECLARE_OK => Self::QueueDeclareOk(QueueDeclareOk {
                queue: d.shortstr()?,
                message_count: d.u32()?,
                consumer_count: d.u32()?,
            }),
            MethodId::QUEUE_BIND => {
                d.u16()?;
                Self::QueueBind(QueueBind {
                    queue: d.shortstr()?,
                    exchange: d.shortstr()?,
                    routing_key: d.shortstr()?,
                    no_wait: bit(d.u8()?, 0),
                    arguments: d.table()?,
                })
            }
            MethodId::QUEUE_BIND_OK => Self::QueueBindOk,
            MethodId::BASIC_QOS => Self::BasicQos {
                prefetch_size: d.u32()?,
                prefetch_count: d.u16()?,
                global: bit(d.u8()?, 0),
            },
            MethodId::BASIC_QOS_OK => Self::BasicQosOk,
            MethodId::BASIC_CONSUME => {
                d.u16()?;
                let queue = d.shortstr()?;
                let consumer_tag = d.shortstr()?;
                let flags = d.u8()?;
                Self::BasicConsume(BasicConsume {
                    queue,
                    consumer_tag,
                    no_local: bit(flags, 0),
                    no_ack: bit(flags, 1),
                    exclusive: bit(flags, 2),
                    no_wait: bit(flags, 3),
                    arguments: d.table()?,
                })
            }
            MethodId::BASIC_CONSUME_OK => Self::BasicConsumeOk {
                consumer_tag: d.shortstr()?,
            },
            MethodId::BASIC_CANCEL => Self::BasicCancel {
                consumer_tag: d.shortstr()?,
                no_wait: bit(d.u8()?, 0),
            },
            MethodId::BASIC_CANCEL_OK => Self::BasicCancelOk {
                consumer_tag: d.shortstr()?,
            },
            MethodId::BASIC_DELIVER => {
                let consumer_tag = d.shortstr()?;
                let delivery_tag = d.u64()?;
                let redelivered = bit(d.u8()?, 0);
                Self::BasicDeliver(BasicDeliver {
                    consumer_tag,
                    delivery_tag,
                    redelivered,
                    exchange: d.shortstr()?,
                    routing_key: d.shortstr()?,
                })
            }
            MethodId::BASIC_ACK => Self::BasicAck {
                delivery_tag: d.u64()?,
                multiple: bit(d.u8()?, 0),
            },
            MethodId::BASIC_REJECT => Self::BasicReject {
                delivery_tag: d.u64()?,
                requeue: bit(d.u8()?, 0),
            },
            MethodId::BASIC_NACK => {
                let delivery_tag = d.u64()?;
                let flags = d.u8()?;
                Self::BasicNack {
                    delivery_tag,
                    multiple: bit(flags, 0),
                    requeue: bit(flags, 1),
                }
            }
            MethodId { class, method } => return Err(CodecError::UnknownMethod { class, method }),
        };
        Ok(method)
    }
}

fn decode_tune(d: &mut Decoder<'_>) -> Result<Tune, CodecError> {
    Ok(Tune {
        channel_max: d.u16()?,
        frame_max: d.u32()?,
        heartbeat: d.u16()?,
    })
}

fn decode_close(d: &mut Decoder<'_>) -> Result<Close, CodecError> {
    Ok(Close {
        reply_code: d.u16()?,
        reply_text: d.shortstr()?,
        class_id: d.u16()?,
        method_id: d.u16()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(method: &Method) -> BytesMut {
        let mut buf = BytesMut::new();
        method.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn queue_declare_packs_flags() {
        let method = Method::QueueDeclare(QueueDeclare {
            queue: "verify".into(),
            passive: false,
            durable: false,
            exclusive: true,
            auto_delete: true,
            no_wait: false,
            arguments: FieldTable::new(),
        });
        let buf = encoded(&method);

        // class, method, ticket, "verify"
        let flags = buf[4 + 2 + 1 + 6];
        assert_eq!(flags, 0b0_1100);
        assert_eq!(Method::decode(&buf).unwrap(), method);
    }

    #[test]
    fn deliver_decodes_fields() {
        let method = Method::BasicDeliver(BasicDeliver {
            consumer_tag: "ctag".into(),
            delivery_tag: 42,
            redelivered: true,
            exchange: "amq.topic".into(),
            routing_key: "org.example.t".into(),
        });
        assert_eq!(Method::decode(&encoded(&method)).unwrap(), method);
    }

    #[test]
    fn nack_carries_requeue_in_second_bit() {
        let buf = encoded(&Method::BasicNack {
            delivery_tag: 7,
            multiple: false,
            requeue: true,
        });
        assert_eq!(buf[buf.len() - 1], 0b10);
    }

    #[test]
    fn unknown_method_is_reported() {
        // basic.publish is never decoded by a consumer
        let raw = [0, 60, 0, 40];
        assert_eq!(
            Method::decode(&raw),
            Err(CodecError::UnknownMethod {
                class: 60,
                method: 40
            })
        );
    }

    #[test]
    fn truncated_arguments_are_an_error() {
        let buf = encoded(&Method::ConnectionTune(Tune {
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat: 60,
        }));
        assert!(matches!(
            Method::decode(&buf[..buf.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
