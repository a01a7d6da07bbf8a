//! Infrastructure broker implementations.
//!
//! The broker abstraction lives in `auction-product-events` as pure mechanics.
//! This module provides the NATS JetStream-backed implementation.

pub mod jetstream;

pub use jetstream::{JetStreamBroker, JetStreamDelivery};
