// observability/metrics.rs - Simulation Metrics

use crate::message::{Performative, Tick};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Negotiation side, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Participant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Participant => "participant",
        }
    }
}

/// Metric names
pub struct NegotiationMetrics;

impl NegotiationMetrics {
    pub const MESSAGES_SENT_TOTAL: &'static str = "fipa_tick_messages_sent_total";
    pub const OUTCOMES_TOTAL: &'static str = "fipa_tick_negotiation_outcomes_total";
    pub const NOT_UNDERSTOOD_TOTAL: &'static str = "fipa_tick_not_understood_total";
    pub const CURRENT_TICK: &'static str = "fipa_tick_current_tick";
}

/// Handle to the installed Prometheus recorder
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install a Prometheus recorder as the global `metrics` recorder.
///
/// No listener is started; call [`MetricsHandle::render`] to read the values.
pub fn init_metrics() -> Result<MetricsHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        NegotiationMetrics::MESSAGES_SENT_TOTAL,
        "Messages delivered, by performative"
    );
    describe_counter!(
        NegotiationMetrics::OUTCOMES_TOTAL,
        "Finished negotiation activations, by role and end key"
    );
    describe_counter!(
        NegotiationMetrics::NOT_UNDERSTOOD_TOTAL,
        "Replies converted to not-understood because of malformed content"
    );
    describe_gauge!(NegotiationMetrics::CURRENT_TICK, "Current simulation tick");

    Ok(MetricsHandle { handle })
}

pub fn record_message_sent(performative: Performative) {
    counter!(NegotiationMetrics::MESSAGES_SENT_TOTAL, "performative" => performative.as_str())
        .increment(1);
}

pub fn record_negotiation_outcome(role: Role, key: &'static str) {
    counter!(NegotiationMetrics::OUTCOMES_TOTAL, "role" => role.as_str(), "key" => key).increment(1);
}

pub fn record_not_understood(role: Role) {
    counter!(NegotiationMetrics::NOT_UNDERSTOOD_TOTAL, "role" => role.as_str()).increment(1);
}

pub fn record_tick(tick: Tick) {
    gauge!(NegotiationMetrics::CURRENT_TICK).set(tick as f64);
}
