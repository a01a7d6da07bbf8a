//! Tracing/logging initialization.
//!
//! `RUST_LOG`, when set, overrides the configured level. Output is either one
//! JSON object per event or human-readable text.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

const FALLBACK_LEVEL: &str = "info";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format {0:?} (expected \"json\" or \"text\")")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            other => Err(UnknownLogFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter directive, e.g. `debug` or `info,auction_product_infra=trace`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: FALLBACK_LEVEL.to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogSettings {
    pub fn new(level: impl Into<String>, format: &str) -> Result<Self, UnknownLogFormat> {
        Ok(Self {
            level: level.into(),
            format: format.parse()?,
        })
    }

    /// Filter from `RUST_LOG`, else the configured level, else `info`.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
    }
}

/// Install the global subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops returning `false`).
pub fn init(settings: &LogSettings) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(settings.filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    match settings.format {
        LogFormat::Json => builder.json().with_current_span(true).try_init().is_ok(),
        LogFormat::Text => builder.try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" text ".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert_eq!(
            "xml".parse::<LogFormat>(),
            Err(UnknownLogFormat("xml".to_string()))
        );
    }

    #[test]
    fn settings_reject_unknown_format() {
        assert!(LogSettings::new("debug", "yaml").is_err());
        let settings = LogSettings::new("debug", "text").unwrap();
        assert_eq!(settings.format, LogFormat::Text);
        assert_eq!(settings.level, "debug");
    }

    #[test]
    fn second_init_is_a_no_op() {
        let settings = LogSettings::default();
        init(&settings);
        assert!(!init(&settings));
    }
}
