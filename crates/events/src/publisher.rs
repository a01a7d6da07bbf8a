//! Idempotent event publisher.
//!
//! Every outbound event is serialized as `{"key": .., "value": ..}`, stamped with
//! the caller identity and an occurred-at header, and published with the
//! envelope key as the broker dedup token. Transport failures are retried with
//! the same token, so a retry that raced a successful publish is dropped by the
//! broker instead of producing a second event.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use tracing::{debug, instrument, warn};

use auction_product_core::{Classify, ErrorKind, UserId};

use crate::bus::{Broker, BrokerError, Headers, OutboundMessage, PublishAck};
use crate::event::{OutcomeEnvelope, OutcomeKind};

/// Outbound subject per outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSubjects {
    pub created: String,
    pub updated: String,
    pub deleted: String,
    pub found: String,
    pub list_found: String,
    pub error: String,
}

impl EventSubjects {
    pub fn subject_for(&self, kind: OutcomeKind) -> &str {
        match kind {
            OutcomeKind::Created => &self.created,
            OutcomeKind::Updated => &self.updated,
            OutcomeKind::Deleted => &self.deleted,
            OutcomeKind::Found => &self.found,
            OutcomeKind::ListFound => &self.list_found,
            OutcomeKind::Error => &self.error,
        }
    }
}

impl Default for EventSubjects {
    fn default() -> Self {
        Self {
            created: "product.event.product_created".to_string(),
            updated: "product.event.product_updated".to_string(),
            deleted: "product.event.product_deleted".to_string(),
            found: "product.event.product_found".to_string(),
            list_found: "product.event.products_found".to_string(),
            error: "error.product".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSettings {
    pub subjects: EventSubjects,
    /// Header carrying the caller identity.
    pub caller_header: String,
    /// Header carrying the publish timestamp (RFC 3339).
    pub occurred_at_header: String,
    /// Extra attempts after the first failed publish.
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            subjects: EventSubjects::default(),
            caller_header: "Auth-User-Id".to_string(),
            occurred_at_header: "Msg-Occured-At".to_string(),
            retries: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode {subject} event: {source}")]
    Encode {
        subject: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to publish {subject} event after {attempts} attempt(s): {source}")]
    Broker {
        subject: String,
        attempts: u32,
        #[source]
        source: BrokerError,
    },
}

impl Classify for PublishError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Publishes one outcome event on behalf of `caller`.
#[async_trait]
pub trait OutcomePublisher: Send + Sync {
    async fn publish(
        &self,
        caller: &UserId,
        event: OutcomeEnvelope,
    ) -> Result<PublishAck, PublishError>;
}

#[async_trait]
impl<P> OutcomePublisher for std::sync::Arc<P>
where
    P: OutcomePublisher + ?Sized,
{
    async fn publish(
        &self,
        caller: &UserId,
        event: OutcomeEnvelope,
    ) -> Result<PublishAck, PublishError> {
        (**self).publish(caller, event).await
    }
}

#[derive(Debug, Clone)]
pub struct IdempotentPublisher<B> {
    broker: B,
    settings: PublisherSettings,
}

impl<B> IdempotentPublisher<B> {
    pub fn new(broker: B, settings: PublisherSettings) -> Self {
        Self { broker, settings }
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }
}

#[async_trait]
impl<B> OutcomePublisher for IdempotentPublisher<B>
where
    B: Broker,
{
    #[instrument(
        skip(self, event),
        fields(caller = %caller, key = %event.key, event_type = event.value.event_type()),
        err
    )]
    async fn publish(
        &self,
        caller: &UserId,
        event: OutcomeEnvelope,
    ) -> Result<PublishAck, PublishError> {
        let subject = self
            .settings
            .subjects
            .subject_for(event.value.kind())
            .to_string();

        let payload = serde_json::to_vec(&event).map_err(|source| PublishError::Encode {
            subject: subject.clone(),
            source,
        })?;

        let headers = Headers::new()
            .with(self.settings.caller_header.as_str(), caller.as_str())
            .with(
                self.settings.occurred_at_header.as_str(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            );

        let message = OutboundMessage {
            subject: subject.clone(),
            dedup_key: event.key,
            headers,
            payload: Bytes::from(payload),
        };

        let max_attempts = self.settings.retries + 1;
        let mut attempt = 1;
        loop {
            match self.broker.publish(message.clone()).await {
                Ok(ack) => {
                    debug!(
                        subject = %subject,
                        sequence = ack.sequence,
                        duplicate = ack.duplicate,
                        attempt,
                        "event published"
                    );
                    return Ok(ack);
                }
                Err(source) if attempt >= max_attempts => {
                    return Err(PublishError::Broker {
                        subject,
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    warn!(subject = %subject, attempt, error = %e, "publish failed, retrying");
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}
