//! Message dispatch: consumers, the per-message pipeline and the ack policy.

pub mod ack_policy;
pub mod consumer;
pub mod pipeline;

pub use ack_policy::{NAK_DELAY, decide};
pub use consumer::{ACK_WAIT, ConsumerDispatch, DispatchError, MAX_DELIVER, descriptor};
pub use pipeline::{HandlerPipeline, PipelineError, PipelineReport, PipelineSettings};
