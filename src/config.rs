// config.rs - Simulation configuration
//
//! Layered configuration, lowest precedence first:
//!
//! 1. Compiled defaults
//! 2. Optional TOML file
//! 3. Environment variables `FIPA_TICK__<SECTION>__<KEY>`
//!    (e.g. `FIPA_TICK__NEGOTIATION__PROPOSAL_TIMEOUT_TICKS=3`)

use crate::observability::TracingConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FIPA_TICK";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub logging: TracingConfig,
    pub negotiation: NegotiationConfig,
    pub world: WorldConfig,
    pub market: MarketConfig,
}

/// Contract-net timing and routing. Budgets are counted in ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Topic (ontology) the negotiation messages carry
    pub topic: String,

    /// Ticks the initiator waits for proposals beyond the first
    pub proposal_timeout_ticks: u32,

    /// Ticks the initiator waits for INFORM/FAILURE confirmations
    pub confirmation_timeout_ticks: u32,

    /// Ticks a participant waits for ACCEPT/REJECT after proposing
    pub accept_timeout_ticks: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            topic: "trade".into(),
            proposal_timeout_ticks: 1,
            confirmation_timeout_ticks: 1,
            accept_timeout_ticks: 2,
        }
    }
}

impl NegotiationConfig {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("negotiation.topic must not be empty".into()));
        }
        if self.confirmation_timeout_ticks == 0 {
            return Err(ConfigError::Invalid(
                "negotiation.confirmation_timeout_ticks must be at least 1".into(),
            ));
        }
        if self.accept_timeout_ticks == 0 {
            return Err(ConfigError::Invalid(
                "negotiation.accept_timeout_ticks must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Ticks to run
    pub ticks: u64,

    /// RNG seed; the same seed replays the same run
    pub seed: u64,

    /// Whether owners reset finished actions on the next tick
    pub restart_finished_actions: bool,

    /// Delivered messages kept for inspection
    pub message_log_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            ticks: 20,
            seed: 42,
            restart_finished_actions: true,
            message_log_capacity: 10_000,
        }
    }
}

/// Buyer/seller population for the market simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub buyers: usize,
    pub sellers: usize,

    /// Sellers each buyer solicits per request, picked uniformly at random
    pub fan_out: usize,

    pub resource: String,

    /// Units a buyer wants per request
    pub quantity: u32,

    /// Highest unit price a buyer accepts
    pub max_price: u32,

    /// Seller asking prices are spread evenly over `min_ask..=max_ask`
    pub min_ask: u32,
    pub max_ask: u32,

    /// Initial units per seller
    pub stock: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            buyers: 2,
            sellers: 4,
            fan_out: 3,
            resource: "grain".into(),
            quantity: 2,
            max_price: 12,
            min_ask: 6,
            max_ask: 14,
            stock: 4,
        }
    }
}

impl MarketConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buyers + self.sellers == 0 {
            return Err(ConfigError::Invalid("market has no agents".into()));
        }
        if self.fan_out == 0 {
            return Err(ConfigError::Invalid("market.fan_out must be at least 1".into()));
        }
        if self.quantity == 0 {
            return Err(ConfigError::Invalid("market.quantity must be at least 1".into()));
        }
        if self.min_ask > self.max_ask {
            return Err(ConfigError::Invalid(format!(
                "market.min_ask ({}) exceeds market.max_ask ({})",
                self.min_ask, self.max_ask
            )));
        }
        Ok(())
    }
}

impl SimulationConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, true)
    }

    pub fn load_with_env(path: Option<&Path>, use_env: bool) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&SimulationConfig::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        if use_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: SimulationConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.negotiation.validate()?;
        self.market.validate()
    }
}
