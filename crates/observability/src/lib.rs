//! Tracing and logging (shared setup).

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogFormat, LogSettings, UnknownLogFormat};

/// Initialize process-wide logging.
///
/// Safe to call multiple times; returns `false` when a subscriber was already installed.
pub fn init(settings: &LogSettings) -> bool {
    crate::tracing::init(settings)
}
