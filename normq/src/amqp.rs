//! AMQP binding of the [`Transport`] trait.
//!
//! The service listens on the routing key `norminette`. For each run the
//! client declares the direct exchange of the same name, an exclusive
//! server-named reply queue bound to it under the queue's own name, and
//! consumes that queue without acknowledgements. Requests go out on the
//! default exchange carrying `reply_to` and the session `correlation_id`.
use amiquip::{
    AmqpProperties, Channel, Connection, Consumer, ConsumerMessage, ConsumerOptions, Exchange,
    ExchangeDeclareOptions, ExchangeType, FieldTable, Publish, QueueDeclareOptions,
};
use crossbeam_channel::TryRecvError;
use std::net::ToSocketAddrs;
use tracing::{debug, info, trace};

use crate::config::ClientConfig;
use crate::errors::{ClientError, ClientResult};
use crate::protocol::RequestEnvelope;
use crate::transport::{ReplyHandler, Transport};

/// An open broker connection and its channel
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
    routing_key: String,
}

impl AmqpSession {
    /// Resolves the host, then connects with the configured credentials.
    ///
    /// Both a failed lookup and a refused connection are reported as
    /// [`ClientError::BrokerUnreachable`].
    pub fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let endpoint = (config.host.as_str(), config.port);
        let resolved = endpoint
            .to_socket_addrs()
            .map_err(|e| ClientError::broker_unreachable(&config.host, e))?
            .count();
        debug!("{} resolved to {} addresses", config.host, resolved);

        let mut connection = Connection::insecure_open(&config.amqp_url())
            .map_err(|e| ClientError::broker_unreachable(&config.host, e))?;
        let channel = connection
            .open_channel(None)
            .map_err(ClientError::transport)?;
        info!("Connected to {}:{}", config.host, config.port);

        Ok(Self {
            connection,
            channel,
            routing_key: config.routing_key.clone(),
        })
    }

    /// Declares the reply topology and starts consuming it
    pub fn transport(&self) -> ClientResult<AmqpTransport<'_>> {
        let exchange = self
            .channel
            .exchange_declare(
                ExchangeType::Direct,
                self.routing_key.as_str(),
                ExchangeDeclareOptions::default(),
            )
            .map_err(ClientError::transport)?;

        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..QueueDeclareOptions::default()
                },
            )
            .map_err(ClientError::transport)?;
        let reply_queue = queue.name().to_string();
        queue
            .bind(&exchange, reply_queue.as_str(), FieldTable::new())
            .map_err(ClientError::transport)?;

        let consumer = self
            .channel
            .basic_consume(
                reply_queue.as_str(),
                ConsumerOptions {
                    no_ack: true,
                    ..ConsumerOptions::default()
                },
            )
            .map_err(ClientError::transport)?;
        debug!("Consuming replies on {}", reply_queue);

        Ok(AmqpTransport {
            channel: &self.channel,
            consumer,
            reply_queue,
            routing_key: self.routing_key.clone(),
        })
    }

    pub fn close(self) -> ClientResult<()> {
        self.channel.close().map_err(ClientError::transport)?;
        self.connection.close().map_err(ClientError::transport)?;
        debug!("Broker connection closed");
        Ok(())
    }
}

/// Publishes on the default exchange and reads the exclusive reply queue
pub struct AmqpTransport<'a> {
    channel: &'a Channel,
    consumer: Consumer<'a>,
    reply_queue: String,
    routing_key: String,
}

impl AmqpTransport<'_> {
    fn deliver(message: ConsumerMessage, on_reply: &mut ReplyHandler<'_>) -> ClientResult<()> {
        match message {
            ConsumerMessage::Delivery(delivery) => {
                trace!("Reply of {} bytes", delivery.body.len());
                on_reply(&delivery.body)
            }
            ConsumerMessage::ServerClosedChannel(err)
            | ConsumerMessage::ServerClosedConnection(err) => Err(ClientError::transport(err)),
            _ => Err(ClientError::transport("reply consumer was cancelled")),
        }
    }
}

impl Transport for AmqpTransport<'_> {
    fn reply_channel(&self) -> &str {
        &self.reply_queue
    }

    fn publish(&mut self, envelope: RequestEnvelope) -> ClientResult<()> {
        let properties = AmqpProperties::default()
            .with_reply_to(envelope.reply_to)
            .with_correlation_id(envelope.correlation_id);
        Exchange::direct(self.channel)
            .publish(Publish::with_properties(
                &envelope.body,
                self.routing_key.as_str(),
                properties,
            ))
            .map_err(ClientError::transport)
    }

    fn process_events(&mut self, on_reply: &mut ReplyHandler<'_>) -> ClientResult<()> {
        let receiver = self.consumer.receiver();
        let first = receiver
            .recv()
            .map_err(|_| ClientError::transport("reply consumer disconnected"))?;
        Self::deliver(first, on_reply)?;

        loop {
            match receiver.try_recv() {
                Ok(message) => Self::deliver(message, on_reply)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(ClientError::transport("reply consumer disconnected"))
                }
            }
        }
    }
}
