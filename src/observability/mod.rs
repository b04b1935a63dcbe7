// observability/mod.rs - Tracing and Metrics

//! Structured logging and simulation counters.
//!
//! - **Tracing**: `tracing-subscriber` with pretty, compact or JSON output
//! - **Metrics**: counters recorded through the `metrics` facade; a
//!   Prometheus recorder can be installed to render them as text
//!
//! Recording is a no-op until a recorder is installed, so library code calls
//! the `record_*` helpers unconditionally.

mod metrics;
mod tracing_setup;

pub use metrics::{
    init_metrics, record_message_sent, record_negotiation_outcome, record_not_understood,
    record_tick, MetricsHandle, NegotiationMetrics, Role,
};

pub use tracing_setup::{init_tracing, TracingConfig, TracingFormat};
