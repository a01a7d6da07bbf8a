//! NATS JetStream-backed broker (durable, at-least-once delivery).
//!
//! - **Durable pull consumers**: one per operation, created-or-updated on start
//! - **Explicit acks**: ack / double-ack / delayed nak / term per message
//! - **Delivery counter**: read from the JetStream message metadata
//! - **Publish dedup**: the dedup key travels as `Nats-Msg-Id`; the stream's
//!   duplicate window drops repeats and reports them in the publish ack
//!
//! Streams are provisioned outside this service; a missing stream is a
//! consumer-creation error.

use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer, context::Publish};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, instrument};

use auction_product_events::{
    Broker, BrokerError, ConsumerDescriptor, Delivery, DeliveryStream, Headers, OutboundMessage,
    PublishAck,
};

#[derive(Clone)]
pub struct JetStreamBroker {
    context: jetstream::Context,
}

impl core::fmt::Debug for JetStreamBroker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JetStreamBroker").finish_non_exhaustive()
    }
}

impl JetStreamBroker {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }

    /// Connect to the NATS server at `url` and open a JetStream context.
    #[instrument(err)]
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connection(format!("{url}: {e}")))?;

        Ok(Self::new(jetstream::new(client)))
    }

    pub fn context(&self) -> &jetstream::Context {
        &self.context
    }
}

#[async_trait]
impl Broker for JetStreamBroker {
    type Delivery = JetStreamDelivery;

    #[instrument(
        skip(self, descriptor),
        fields(consumer = %descriptor.name, stream = %descriptor.stream, subject = %descriptor.filter_subject),
        err
    )]
    async fn create_or_update_consumer(
        &self,
        descriptor: &ConsumerDescriptor,
    ) -> Result<DeliveryStream<Self::Delivery>, BrokerError> {
        let stream = self
            .context
            .get_stream(&descriptor.stream)
            .await
            .map_err(|e| {
                BrokerError::Consumer(format!("failed to get stream {}: {e}", descriptor.stream))
            })?;

        let max_deliver = i64::try_from(descriptor.max_deliver).unwrap_or(i64::MAX);
        let consumer: consumer::PullConsumer = stream
            .create_consumer(consumer::pull::Config {
                durable_name: Some(descriptor.name.clone()),
                name: Some(descriptor.name.clone()),
                filter_subject: descriptor.filter_subject.clone(),
                ack_policy: consumer::AckPolicy::Explicit,
                ack_wait: descriptor.ack_wait,
                max_deliver,
                deliver_policy: consumer::DeliverPolicy::All,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                BrokerError::Consumer(format!(
                    "failed to create consumer {}: {e}",
                    descriptor.name
                ))
            })?;

        let messages = consumer.messages().await.map_err(|e| {
            BrokerError::Consumer(format!(
                "failed to open pull subscription for {}: {e}",
                descriptor.name
            ))
        })?;

        debug!("pull subscription open");

        Ok(messages
            .map(|result| {
                result
                    .map(JetStreamDelivery::from_message)
                    .map_err(|e| BrokerError::Receive(e.to_string()))
            })
            .boxed())
    }

    #[instrument(
        skip(self, message),
        fields(subject = %message.subject, dedup_key = %message.dedup_key),
        err
    )]
    async fn publish(&self, message: OutboundMessage) -> Result<PublishAck, BrokerError> {
        let mut publish = Publish::build()
            .payload(message.payload)
            .message_id(message.dedup_key.as_str());
        for (name, value) in message.headers.iter() {
            publish = publish.header(name, value);
        }

        let ack = self
            .context
            .send_publish(message.subject, publish)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    #[instrument(skip(self), err)]
    async fn verify_stream(&self, stream: &str) -> Result<(), BrokerError> {
        self.context
            .get_stream(stream)
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::StreamNotFound(format!("{stream}: {e}")))
    }
}

/// A message pulled from a JetStream consumer.
pub struct JetStreamDelivery {
    message: jetstream::Message,
    subject: String,
    headers: Headers,
    delivered: u64,
}

impl core::fmt::Debug for JetStreamDelivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JetStreamDelivery")
            .field("subject", &self.subject)
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}

impl JetStreamDelivery {
    fn from_message(message: jetstream::Message) -> Self {
        let subject = message.subject.to_string();
        let headers = message
            .headers
            .as_ref()
            .map(|map| {
                map.iter()
                    .filter_map(|(name, values)| {
                        values
                            .first()
                            .map(|value| (name.to_string(), value.as_str().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let delivered = message
            .info()
            .ok()
            .and_then(|info| u64::try_from(info.delivered).ok())
            .unwrap_or(1);

        Self {
            message,
            subject,
            headers,
            delivered,
        }
    }

    async fn ack_kind(self, kind: AckKind) -> Result<(), BrokerError> {
        self.message
            .ack_with(kind)
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn delivered(&self) -> u64 {
        self.delivered
    }

    async fn ack(self) -> Result<(), BrokerError> {
        self.ack_kind(AckKind::Ack).await
    }

    async fn double_ack(self) -> Result<(), BrokerError> {
        self.message
            .double_ack()
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn nak_with_delay(self, delay: Duration) -> Result<(), BrokerError> {
        self.ack_kind(AckKind::Nak(Some(delay))).await
    }

    async fn term(self) -> Result<(), BrokerError> {
        self.ack_kind(AckKind::Term).await
    }
}
