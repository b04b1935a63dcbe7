// observability/tracing_setup.rs - Tracing Configuration

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    /// Human-readable, multi-line
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// JSON objects for log aggregation
    Json,
}

/// Configuration for tracing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Filter directive (e.g. "info", "fipa_tick_agents=debug").
    /// `RUST_LOG` wins when set.
    pub filter: String,

    pub format: TracingFormat,

    /// Emit span close events; each action tick is a span
    pub with_span_events: bool,

    /// Include file and line numbers
    pub with_file: bool,

    pub with_target: bool,

    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info,fipa_tick_agents=info".into(),
            format: TracingFormat::Pretty,
            with_span_events: false,
            with_file: false,
            with_target: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// JSON lines, no colors
    pub fn production() -> Self {
        Self {
            format: TracingFormat::Json,
            with_ansi: false,
            ..Self::default()
        }
    }

    /// Every protocol step, with spans and source locations
    pub fn development() -> Self {
        Self {
            filter: "debug,fipa_tick_agents=trace".into(),
            format: TracingFormat::Compact,
            with_span_events: true,
            with_file: true,
            ..Self::default()
        }
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed (e.g. called twice).
pub fn init_tracing(config: &TracingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let span_events = if config.with_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_target(config.with_target);

    match config.format {
        TracingFormat::Pretty => registry.with(layer.pretty().with_ansi(config.with_ansi)).try_init()?,
        TracingFormat::Compact => registry.with(layer.compact().with_ansi(config.with_ansi)).try_init()?,
        TracingFormat::Json => registry.with(layer.json()).try_init()?,
    }

    tracing::debug!(filter = %config.filter, format = ?config.format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert!(config.filter.contains("info"));
        assert_eq!(config.format, TracingFormat::Pretty);
        assert!(config.with_ansi);
    }

    #[test]
    fn test_tracing_config_presets() {
        let production = TracingConfig::production();
        assert_eq!(production.format, TracingFormat::Json);
        assert!(!production.with_ansi);

        let development = TracingConfig::development();
        assert!(development.with_span_events);
        assert!(development.filter.contains("trace"));
    }
}
