//! Durable broker abstraction (mechanics only).
//!
//! The broker is the transport for inbound commands/queries and outbound events.
//! It is assumed to provide:
//!
//! - **Durable consumers**: one per operation, created-or-updated idempotently
//! - **At-least-once delivery**: unsettled messages are redelivered after the
//!   consumer's ack-wait window, up to `max_deliver` attempts
//! - **Per-message delivery counter**: exposed as [`Delivery::delivered`]
//! - **Publish deduplication**: publishes carrying the same dedup key inside the
//!   broker's window are dropped (the ack reports them as duplicates)
//!
//! There is no retry timer in-process; redelivery is entirely broker-owned.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Message headers (single-valued, ordered by name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Header value, treating an empty value like a missing header.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic text rendering (`name: value` pairs joined by `; `).
    pub fn render(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Durable pull consumer definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerDescriptor {
    /// Durable consumer name (deterministic per app + operation).
    pub name: String,
    /// Stream the consumer is bound to.
    pub stream: String,
    pub filter_subject: String,
    pub max_deliver: u64,
    pub ack_wait: Duration,
}

/// Message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    /// Broker-level deduplication token.
    pub dedup_key: String,
    pub headers: Headers,
    pub payload: Bytes,
}

/// Broker confirmation of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    /// The broker recognised the dedup key and dropped the message.
    pub duplicate: bool,
}

/// Terminal disposition of one inbound message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge and wait for the broker to confirm the ack itself.
    DoubleAck,
    /// Fire-and-forget acknowledge (permanent failure accepted).
    Ack,
    /// Negative-acknowledge; redeliver after the delay.
    NakWithDelay(Duration),
    /// Permanently failed, no further redelivery.
    Terminate,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::DoubleAck => "double_ack",
            Disposition::Ack => "ack",
            Disposition::NakWithDelay(_) => "nak",
            Disposition::Terminate => "term",
        }
    }

    /// Whether the broker will hand the message out again.
    pub fn redelivers(&self) -> bool {
        matches!(self, Disposition::NakWithDelay(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("acknowledgment failed: {0}")]
    Ack(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

/// One pulled message awaiting exactly one disposition.
///
/// Disposition methods take `self` by value: once settled, a delivery cannot be
/// settled again.
#[async_trait]
pub trait Delivery: Send + Sync + Sized + 'static {
    fn subject(&self) -> &str;

    fn headers(&self) -> &Headers;

    fn payload(&self) -> &[u8];

    /// How many times the broker has handed this message out (1 on first delivery).
    fn delivered(&self) -> u64;

    async fn ack(self) -> Result<(), BrokerError>;

    async fn double_ack(self) -> Result<(), BrokerError>;

    async fn nak_with_delay(self, delay: Duration) -> Result<(), BrokerError>;

    async fn term(self) -> Result<(), BrokerError>;

    async fn settle(self, disposition: Disposition) -> Result<(), BrokerError> {
        match disposition {
            Disposition::DoubleAck => self.double_ack().await,
            Disposition::Ack => self.ack().await,
            Disposition::NakWithDelay(delay) => self.nak_with_delay(delay).await,
            Disposition::Terminate => self.term().await,
        }
    }
}

pub type DeliveryStream<D> = BoxStream<'static, Result<D, BrokerError>>;

/// Durable pub/sub primitive.
///
/// Implementations must be safe to share across tasks; the handle is cloned into
/// every pipeline invocation.
#[async_trait]
pub trait Broker: Send + Sync {
    type Delivery: Delivery;

    /// Create or update the durable consumer, then open a pull subscription on it.
    ///
    /// Idempotent: safe to call on every process start.
    async fn create_or_update_consumer(
        &self,
        descriptor: &ConsumerDescriptor,
    ) -> Result<DeliveryStream<Self::Delivery>, BrokerError>;

    async fn publish(&self, message: OutboundMessage) -> Result<PublishAck, BrokerError>;

    /// Fail with [`BrokerError::StreamNotFound`] unless `stream` exists.
    async fn verify_stream(&self, stream: &str) -> Result<(), BrokerError>;
}

#[async_trait]
impl<B> Broker for std::sync::Arc<B>
where
    B: Broker + ?Sized,
{
    type Delivery = B::Delivery;

    async fn create_or_update_consumer(
        &self,
        descriptor: &ConsumerDescriptor,
    ) -> Result<DeliveryStream<Self::Delivery>, BrokerError> {
        (**self).create_or_update_consumer(descriptor).await
    }

    async fn publish(&self, message: OutboundMessage) -> Result<PublishAck, BrokerError> {
        (**self).publish(message).await
    }

    async fn verify_stream(&self, stream: &str) -> Result<(), BrokerError> {
        (**self).verify_stream(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_render_sorted_by_name() {
        let headers = Headers::new()
            .with("Nats-Msg-Id", "m1")
            .with("Auth-User-Id", "u1");

        assert_eq!(headers.render(), "Auth-User-Id: u1; Nats-Msg-Id: m1");
    }

    #[test]
    fn empty_header_values_count_as_missing() {
        let headers = Headers::new().with("Auth-User-Id", "");
        assert_eq!(headers.get("Auth-User-Id"), Some(""));
        assert_eq!(headers.get_non_empty("Auth-User-Id"), None);
    }

    #[test]
    fn only_nak_redelivers() {
        assert!(Disposition::NakWithDelay(Duration::from_secs(3)).redelivers());
        assert!(!Disposition::Ack.redelivers());
        assert!(!Disposition::DoubleAck.redelivers());
        assert!(!Disposition::Terminate.redelivers());
    }
}
