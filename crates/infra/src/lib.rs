//! Infrastructure layer: configuration, message dispatch, broker and store adapters.
//!
//! - `config`: environment-backed `AppConfig`
//! - `dispatch`: Consumer Dispatch, Handler Pipeline, Acknowledgment Policy
//! - `event_bus`: NATS JetStream broker adapter
//! - `product_store`: Postgres product store adapter

pub mod config;
pub mod dispatch;
pub mod event_bus;
pub mod product_store;


pub use config::{AppConfig, CommandSubjects, ConfigError, HeaderNames};
pub use dispatch::{
    ConsumerDispatch, DispatchError, HandlerPipeline, PipelineError, PipelineReport,
    PipelineSettings,
};
pub use event_bus::JetStreamBroker;
pub use product_store::PostgresProductStore;
