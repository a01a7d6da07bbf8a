//! Consumer Dispatch.
//!
//! One durable pull consumer per operation. Consumer creation is idempotent and
//! its failure is fatal to startup; after that, a pull loop per consumer hands
//! every delivery to its own task running the [`HandlerPipeline`].

use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, info, info_span, warn};

use auction_product_events::{
    Broker, BrokerError, ConsumerDescriptor, Delivery, DeliveryStream, Operation,
};

use super::pipeline::HandlerPipeline;
use crate::config::CommandSubjects;

/// Redelivery ceiling per message.
pub const MAX_DELIVER: u64 = 2;

/// Time the broker waits for a disposition before redelivering.
pub const ACK_WAIT: Duration = Duration::from_secs(4);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to start consumer {consumer}: {source}")]
    Start {
        consumer: String,
        #[source]
        source: BrokerError,
    },
}

/// Deterministic descriptor for `operation`.
pub fn descriptor(
    app_name: &str,
    stream: &str,
    operation: Operation,
    filter_subject: &str,
) -> ConsumerDescriptor {
    ConsumerDescriptor {
        name: operation.consumer_name(app_name),
        stream: stream.to_string(),
        filter_subject: filter_subject.to_string(),
        max_deliver: MAX_DELIVER,
        ack_wait: ACK_WAIT,
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerDispatch<B> {
    broker: B,
    pipeline: HandlerPipeline,
    app_name: String,
    stream: String,
    subjects: CommandSubjects,
}

impl<B> ConsumerDispatch<B>
where
    B: Broker,
{
    pub fn new(
        broker: B,
        pipeline: HandlerPipeline,
        app_name: impl Into<String>,
        stream: impl Into<String>,
        subjects: CommandSubjects,
    ) -> Self {
        Self {
            broker,
            pipeline,
            app_name: app_name.into(),
            stream: stream.into(),
            subjects,
        }
    }

    pub fn descriptor(&self, operation: Operation) -> ConsumerDescriptor {
        descriptor(
            &self.app_name,
            &self.stream,
            operation,
            self.subjects.subject_for(operation),
        )
    }

    /// Create-or-update the consumer for `operation` and spawn its pull loop.
    pub async fn start(
        &self,
        operation: Operation,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, DispatchError> {
        let descriptor = self.descriptor(operation);
        let messages = self
            .broker
            .create_or_update_consumer(&descriptor)
            .await
            .map_err(|source| DispatchError::Start {
                consumer: descriptor.name.clone(),
                source,
            })?;

        let span = info_span!(
            "consumer",
            consumer = %descriptor.name,
            subject = %descriptor.filter_subject,
        );
        let pipeline = self.pipeline.clone();

        Ok(tokio::spawn(
            pull_loop(pipeline, operation, descriptor.name, messages, shutdown).instrument(span),
        ))
    }

    /// Start every operation's consumer; the first failure aborts.
    pub async fn start_all(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, DispatchError> {
        let mut handles = Vec::with_capacity(Operation::ALL.len());
        for operation in Operation::ALL {
            match self.start(operation, shutdown.clone()).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in &handles {
                        handle.abort();
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }
}

async fn pull_loop<D>(
    pipeline: HandlerPipeline,
    operation: Operation,
    consumer_name: String,
    mut messages: DeliveryStream<D>,
    mut shutdown: watch::Receiver<bool>,
) where
    D: Delivery,
{
    info!("consumer started");
    let mut in_flight = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            next = messages.next() => match next {
                Some(Ok(delivery)) => {
                    let pipeline = pipeline.clone();
                    let consumer_name = consumer_name.clone();
                    in_flight.spawn(
                        async move {
                            pipeline.handle(operation, &consumer_name, delivery).await;
                        }
                        .in_current_span(),
                    );
                }
                Some(Err(e)) => warn!(error = %e, "failed to receive message"),
                None => {
                    info!("message stream ended");
                    break;
                }
            },
        }
    }

    // Let in-flight pipelines settle their messages before the task ends.
    while in_flight.join_next().await.is_some() {}
    info!("consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_use_fixed_consumer_parameters() {
        let d = descriptor(
            "product-service",
            "PRODUCT",
            Operation::Delete,
            "product.command.delete_product",
        );

        assert_eq!(d.name, "product-service-consumer-command-delete-product");
        assert_eq!(d.stream, "PRODUCT");
        assert_eq!(d.max_deliver, 2);
        assert_eq!(d.ack_wait, Duration::from_secs(4));
    }
}
