use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use auction_product_core::{ErrorKind, Product};

use crate::Envelope;

/// Failure report published on the error subject.
///
/// Carries enough context (stream, consumer, subject, raw payload and headers)
/// for an operator to inspect or replay the inbound message offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject: String,
    /// Unique id of the inbound message (correlation).
    pub reference_key: String,
    pub message: String,
    pub code: i32,
    /// Raw inbound payload.
    pub data: Vec<u8>,
    /// Raw inbound headers, rendered as text.
    pub headers: String,
    pub time: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.code)
    }
}

impl core::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "error at stream: {}, consumer: {}, subject: {}, msg_id: {}, code: {}, message: {}, at: {}",
            self.stream_name,
            self.consumer_name,
            self.subject,
            self.reference_key,
            self.code,
            self.message,
            self.time.to_rfc3339()
        )
    }
}

/// Outcome of one business operation, ready to publish.
///
/// Serialized untagged: the wire payload of each event is the bare snapshot
/// (or list / error record); the subject tells consumers which one it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutcomeEvent {
    ProductCreated(Product),
    ProductUpdated(Product),
    ProductDeleted(Product),
    ProductFound(Product),
    ProductsFound(Vec<Product>),
    ErrorOccurred(ErrorRecord),
}

/// Discriminant of [`OutcomeEvent`], used to pick the outbound subject.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Created,
    Updated,
    Deleted,
    Found,
    ListFound,
    Error,
}

impl OutcomeEvent {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            OutcomeEvent::ProductCreated(_) => OutcomeKind::Created,
            OutcomeEvent::ProductUpdated(_) => OutcomeKind::Updated,
            OutcomeEvent::ProductDeleted(_) => OutcomeKind::Deleted,
            OutcomeEvent::ProductFound(_) => OutcomeKind::Found,
            OutcomeEvent::ProductsFound(_) => OutcomeKind::ListFound,
            OutcomeEvent::ErrorOccurred(_) => OutcomeKind::Error,
        }
    }

    /// Stable event name (e.g. "product.created").
    pub fn event_type(&self) -> &'static str {
        match self.kind() {
            OutcomeKind::Created => "product.created",
            OutcomeKind::Updated => "product.updated",
            OutcomeKind::Deleted => "product.deleted",
            OutcomeKind::Found => "product.found",
            OutcomeKind::ListFound => "products.found",
            OutcomeKind::Error => "product.error",
        }
    }
}

pub type OutcomeEnvelope = Envelope<OutcomeEvent>;
