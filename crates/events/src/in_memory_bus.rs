//! In-memory broker for tests/dev.
//!
//! Emulates the parts of a durable broker the dispatch layer relies on:
//! durable consumers keyed by name, a per-message delivery counter, delayed
//! redelivery after a negative ack (bounded by `max_deliver`), and a publish
//! dedup window.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use tokio::time::Instant;

use crate::bus::{
    Broker, BrokerError, ConsumerDescriptor, Delivery, DeliveryStream, Disposition, Headers,
    OutboundMessage, PublishAck,
};

const STREAM_NAME: &str = "in-memory";
const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(120);

/// A disposition the broker accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub consumer: String,
    pub subject: String,
    pub delivered: u64,
    pub disposition: Disposition,
}

#[derive(Debug)]
struct Consumer {
    descriptor: ConsumerDescriptor,
    tx: mpsc::UnboundedSender<Result<InMemoryDelivery, BrokerError>>,
}

#[derive(Debug, Default)]
struct State {
    sequence: u64,
    published: Vec<OutboundMessage>,
    seen: HashMap<String, Instant>,
    consumers: HashMap<String, Consumer>,
    settlements: Vec<Settlement>,
    fail_next_publishes: u32,
    fail_next_settlements: u32,
    reject_consumers: bool,
    missing_streams: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    dedup_window: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_dedup_window(DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_dedup_window(dedup_window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            dedup_window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    /// Make the next `n` publishes fail with a transport error.
    pub fn fail_next_publishes(&self, n: u32) {
        self.lock().fail_next_publishes = n;
    }

    /// Make the next `n` dispositions fail (the message stays unsettled).
    pub fn fail_next_settlements(&self, n: u32) {
        self.lock().fail_next_settlements = n;
    }

    /// Refuse consumer creation (simulates a missing stream).
    pub fn reject_consumers(&self, reject: bool) {
        self.lock().reject_consumers = reject;
    }

    /// Report `stream` as missing from now on.
    pub fn drop_stream(&self, stream: &str) {
        self.lock().missing_streams.insert(stream.to_string());
    }

    /// Hand a message to the consumer filtering on `subject`.
    ///
    /// Returns `false` when no consumer is bound to the subject.
    pub fn deliver(&self, subject: &str, headers: Headers, payload: impl Into<Bytes>) -> bool {
        let payload = payload.into();
        let state = self.lock();
        let Some(consumer) = state
            .consumers
            .values()
            .find(|c| c.descriptor.filter_subject == subject)
        else {
            return false;
        };

        let delivery = InMemoryDelivery {
            consumer: consumer.descriptor.name.clone(),
            max_deliver: consumer.descriptor.max_deliver,
            subject: subject.to_string(),
            headers,
            payload,
            delivered: 1,
            state: Arc::clone(&self.state),
        };
        consumer.tx.unbounded_send(Ok(delivery)).is_ok()
    }

    /// Every message accepted by `publish` (duplicates excluded).
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.lock().published.clone()
    }

    pub fn published_on(&self, subject: &str) -> Vec<OutboundMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.lock().settlements.clone()
    }

    pub fn consumer(&self, name: &str) -> Option<ConsumerDescriptor> {
        self.lock().consumers.get(name).map(|c| c.descriptor.clone())
    }

    pub fn consumer_count(&self) -> usize {
        self.lock().consumers.len()
    }

    /// Poll until at least `n` settlements were recorded or `timeout` elapses.
    pub async fn wait_for_settlements(&self, n: usize, timeout: Duration) -> Vec<Settlement> {
        let deadline = Instant::now() + timeout;
        loop {
            let settled = self.settlements();
            if settled.len() >= n || Instant::now() >= deadline {
                return settled;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Broker for InMemoryBroker {
    type Delivery = InMemoryDelivery;

    async fn create_or_update_consumer(
        &self,
        descriptor: &ConsumerDescriptor,
    ) -> Result<DeliveryStream<Self::Delivery>, BrokerError> {
        let mut state = self.lock();
        if state.reject_consumers {
            return Err(BrokerError::Consumer(format!(
                "stream not found: {}",
                descriptor.stream
            )));
        }

        let (tx, rx) = mpsc::unbounded();
        // Re-binding a durable name replaces the previous subscription.
        state.consumers.insert(
            descriptor.name.clone(),
            Consumer {
                descriptor: descriptor.clone(),
                tx,
            },
        );

        Ok(rx.boxed())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<PublishAck, BrokerError> {
        let mut state = self.lock();
        if state.fail_next_publishes > 0 {
            state.fail_next_publishes -= 1;
            return Err(BrokerError::Publish("broker unavailable".to_string()));
        }

        let now = Instant::now();
        let window = self.dedup_window;
        state.seen.retain(|_, at| now.duration_since(*at) < window);

        if state.seen.contains_key(&message.dedup_key) {
            return Ok(PublishAck {
                stream: STREAM_NAME.to_string(),
                sequence: state.sequence,
                duplicate: true,
            });
        }

        state.seen.insert(message.dedup_key.clone(), now);
        state.sequence += 1;
        state.published.push(message);

        Ok(PublishAck {
            stream: STREAM_NAME.to_string(),
            sequence: state.sequence,
            duplicate: false,
        })
    }

    async fn verify_stream(&self, stream: &str) -> Result<(), BrokerError> {
        if self.lock().missing_streams.contains(stream) {
            return Err(BrokerError::StreamNotFound(stream.to_string()));
        }
        Ok(())
    }
}

/// A message pulled from an [`InMemoryBroker`] consumer.
#[derive(Debug)]
pub struct InMemoryDelivery {
    consumer: String,
    max_deliver: u64,
    subject: String,
    headers: Headers,
    payload: Bytes,
    delivered: u64,
    state: Arc<Mutex<State>>,
}

impl InMemoryDelivery {
    fn settle_with(self, disposition: Disposition) -> Result<(), BrokerError> {
        let mut state = lock_state(&self.state);
        if state.fail_next_settlements > 0 {
            state.fail_next_settlements -= 1;
            return Err(BrokerError::Ack(format!(
                "{} rejected for {}",
                disposition.as_str(),
                self.subject
            )));
        }

        state.settlements.push(Settlement {
            consumer: self.consumer.clone(),
            subject: self.subject.clone(),
            delivered: self.delivered,
            disposition,
        });
        drop(state);

        if let Disposition::NakWithDelay(delay) = disposition {
            if self.delivered < self.max_deliver {
                self.redeliver_after(delay);
            }
        }

        Ok(())
    }

    fn redeliver_after(self, delay: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let state = Arc::clone(&self.state);
            let name = self.consumer.clone();
            let next = InMemoryDelivery {
                delivered: self.delivered + 1,
                ..self
            };
            let guard = lock_state(&state);
            if let Some(consumer) = guard.consumers.get(&name) {
                let _ = consumer.tx.unbounded_send(Ok(next));
            }
        });
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivered(&self) -> u64 {
        self.delivered
    }

    async fn ack(self) -> Result<(), BrokerError> {
        self.settle_with(Disposition::Ack)
    }

    async fn double_ack(self) -> Result<(), BrokerError> {
        self.settle_with(Disposition::DoubleAck)
    }

    async fn nak_with_delay(self, delay: Duration) -> Result<(), BrokerError> {
        self.settle_with(Disposition::NakWithDelay(delay))
    }

    async fn term(self) -> Result<(), BrokerError> {
        self.settle_with(Disposition::Terminate)
    }
}
