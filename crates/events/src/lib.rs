//! Messaging contracts for the product service.
//!
//! - `envelope`, `command`, `query`, `event`: wire payloads (`{"key", "value"}`)
//! - `dedup`: deduplication key derivation for outbound events
//! - `bus`: durable broker port (consumers, deliveries, dispositions, publish)
//! - `in_memory_bus`: broker emulation for tests/dev
//! - `publisher`: idempotent outcome publisher

pub mod bus;
pub mod command;
pub mod dedup;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod publisher;
pub mod query;

pub use bus::{
    Broker, BrokerError, ConsumerDescriptor, Delivery, DeliveryStream, Disposition, Headers,
    OutboundMessage, PublishAck,
};
pub use command::{
    CreateProduct, CreateProductCommand, DeleteProduct, DeleteProductCommand, Operation,
    UpdateProduct, UpdateProductCommand,
};
pub use envelope::Envelope;
pub use event::{ErrorRecord, OutcomeEnvelope, OutcomeEvent, OutcomeKind};
pub use in_memory_bus::{InMemoryBroker, InMemoryDelivery, Settlement};
pub use publisher::{
    EventSubjects, IdempotentPublisher, OutcomePublisher, PublishError, PublisherSettings,
};
pub use query::{FindProduct, FindProductQuery, FindProducts, FindProductsQuery};
