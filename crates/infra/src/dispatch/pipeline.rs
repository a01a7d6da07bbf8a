//! Handler Pipeline.
//!
//! Processes exactly one inbound message end-to-end:
//!
//! ```text
//! delivery
//!   ↓
//! 1. caller identity header        (missing → permission denied)
//!   ↓
//! 2. decode `{key, value}` payload (failure → validation)
//!   ↓
//! 3. business operation
//!   ↓
//! 4. publish outcome event         (failure → internal)
//!   ↓
//! 5. error record on any failure   (best effort)
//!   ↓
//! 6. exactly one disposition       (ack policy)
//! ```
//!
//! The pipeline never returns without settling the delivery: disposition
//! methods consume it, and every path ends in a single `settle` call. A broken
//! error publisher is logged and does not block acknowledgment.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{Instrument, debug, error, info_span, warn};

use auction_product_catalog::{ProductOperations, ServiceError};
use auction_product_core::{Classify, ErrorKind, UserId};
use auction_product_events::{Delivery, Disposition, ErrorRecord, Operation};

use super::ack_policy;

/// Failure inside one pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing caller identity header {0}")]
    MissingIdentity(String),

    #[error("invalid {operation} payload: {source}")]
    Decode {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl Classify for PipelineError {
    fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::MissingIdentity(_) => ErrorKind::PermissionDenied,
            PipelineError::Decode { .. } => ErrorKind::Validation,
            PipelineError::Service(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Stream the inbound messages come from (reported in error records).
    pub stream_name: String,
    pub caller_header: String,
    pub msg_id_header: String,
    /// Consumer redelivery ceiling; the final permitted delivery terminates.
    pub max_deliver: u64,
}

/// What the pipeline did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub operation: Operation,
    pub error: Option<ErrorKind>,
    pub disposition: Disposition,
    /// The broker accepted the disposition.
    pub settled: bool,
}

/// Inbound message metadata kept for error reports after the delivery is consumed.
#[derive(Debug, Clone)]
struct Inbound {
    consumer_name: String,
    subject: String,
    reference_key: String,
    payload: Vec<u8>,
    headers: String,
    delivered: u64,
}

#[derive(Clone)]
pub struct HandlerPipeline {
    service: Arc<dyn ProductOperations>,
    settings: Arc<PipelineSettings>,
}

impl core::fmt::Debug for HandlerPipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerPipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl HandlerPipeline {
    pub fn new(service: Arc<dyn ProductOperations>, settings: PipelineSettings) -> Self {
        Self {
            service,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one delivery through the pipeline and settle it.
    pub async fn handle<D: Delivery>(
        &self,
        operation: Operation,
        consumer_name: &str,
        delivery: D,
    ) -> PipelineReport {
        let inbound = Inbound {
            consumer_name: consumer_name.to_string(),
            subject: delivery.subject().to_string(),
            reference_key: delivery
                .headers()
                .get(&self.settings.msg_id_header)
                .unwrap_or_default()
                .to_string(),
            payload: delivery.payload().to_vec(),
            headers: delivery.headers().render(),
            delivered: delivery.delivered(),
        };

        let span = info_span!(
            "handle_message",
            operation = %operation,
            consumer = %inbound.consumer_name,
            subject = %inbound.subject,
            msg_id = %inbound.reference_key,
            delivered = inbound.delivered,
        );

        self.run(operation, delivery, inbound).instrument(span).await
    }

    async fn run<D: Delivery>(
        &self,
        operation: Operation,
        delivery: D,
        inbound: Inbound,
    ) -> PipelineReport {
        debug!("message received");

        let caller = delivery
            .headers()
            .get_non_empty(&self.settings.caller_header)
            .map(UserId::from);

        let result = match &caller {
            Some(caller) => self.execute(operation, caller, &inbound.payload).await,
            None => Err(PipelineError::MissingIdentity(
                self.settings.caller_header.clone(),
            )),
        };
        let caller = caller.unwrap_or_else(|| UserId::from(""));

        let error = result.as_ref().err().map(|e| e.kind());
        let disposition = ack_policy::decide(error, inbound.delivered, self.settings.max_deliver);

        if let Err(err) = &result {
            self.report_failure(&caller, &inbound, err, disposition).await;
        } else {
            debug!("message handled");
        }

        let settled = match delivery.settle(disposition).await {
            Ok(()) => true,
            Err(e) => {
                error!(disposition = disposition.as_str(), error = %e, "failed to settle message");
                let message = format!("failed to {} message: {e}", disposition.as_str());
                self.publish_record(&caller, &inbound, message, ErrorKind::Internal)
                    .await;
                false
            }
        };

        PipelineReport {
            operation,
            error,
            disposition,
            settled,
        }
    }

    async fn execute(
        &self,
        operation: Operation,
        caller: &UserId,
        payload: &[u8],
    ) -> Result<(), PipelineError> {
        let service = &self.service;
        match operation {
            Operation::Create => {
                let product = service.create(caller, decode(operation, payload)?).await?;
                service.publish_created(caller, &product).await?;
            }
            Operation::Update => {
                let product = service.update(caller, decode(operation, payload)?).await?;
                service.publish_updated(caller, &product).await?;
            }
            Operation::Delete => {
                let product = service.delete(caller, decode(operation, payload)?).await?;
                service.publish_deleted(caller, &product).await?;
            }
            Operation::FindOne => {
                let product = service.find_one(caller, decode(operation, payload)?).await?;
                service.publish_found(caller, &product).await?;
            }
            Operation::FindMany => {
                let products = service.find_many(caller, decode(operation, payload)?).await?;
                service.publish_list_found(caller, &products).await?;
            }
        }
        Ok(())
    }

    async fn report_failure(
        &self,
        caller: &UserId,
        inbound: &Inbound,
        err: &PipelineError,
        disposition: Disposition,
    ) {
        let kind = err.kind();
        let mut message = err.to_string();
        if disposition == Disposition::Terminate {
            message.push_str(&format!(
                " (redelivery exhausted after {} attempts)",
                inbound.delivered
            ));
        }

        if kind.is_permanent() {
            warn!(kind = %kind, code = kind.code(), error = %message, "request rejected");
        } else {
            error!(kind = %kind, code = kind.code(), error = %message, "request failed");
        }

        self.publish_record(caller, inbound, message, kind).await;
    }

    async fn publish_record(
        &self,
        caller: &UserId,
        inbound: &Inbound,
        message: String,
        kind: ErrorKind,
    ) {
        let record = ErrorRecord {
            stream_name: self.settings.stream_name.clone(),
            consumer_name: inbound.consumer_name.clone(),
            subject: inbound.subject.clone(),
            reference_key: inbound.reference_key.clone(),
            message,
            code: kind.code(),
            data: inbound.payload.clone(),
            headers: inbound.headers.clone(),
            time: Utc::now(),
        };

        if let Err(e) = self.service.publish_error(caller, record).await {
            error!(error = %e, "failed to publish error event");
        }
    }
}

fn decode<T: DeserializeOwned>(operation: Operation, payload: &[u8]) -> Result<T, PipelineError> {
    serde_json::from_slice(payload).map_err(|source| PipelineError::Decode { operation, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_product_catalog::{ServiceError, StoreError, ValidationError};

    #[test]
    fn pipeline_errors_classify_consistently() {
        assert_eq!(
            PipelineError::MissingIdentity("Auth-User-Id".into()).kind(),
            ErrorKind::PermissionDenied
        );

        let decode_err = decode::<auction_product_events::CreateProductCommand>(
            Operation::Create,
            b"not json",
        )
        .unwrap_err();
        assert_eq!(decode_err.kind(), ErrorKind::Validation);

        let service: PipelineError = ServiceError::from(ValidationError::new("name is empty")).into();
        assert_eq!(service.kind(), ErrorKind::Validation);

        let store: PipelineError = ServiceError::from(StoreError::backend("timeout")).into();
        assert_eq!(store.kind(), ErrorKind::Internal);
    }
}
