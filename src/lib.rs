// lib.rs - FIPA Tick-Driven Agent Actions
//
// Interruptible, tick-driven agent actions and the FIPA Contract Net
// protocol built on them, with an in-process world to run them in.

#![doc = include_str!("../README.md")]

pub mod action;
pub mod config;
pub mod context;
pub mod market;
pub mod message;
pub mod observability;
pub mod protocol;
pub mod template;
pub mod world;

// Re-export commonly used types
pub use action::{
    Action, ActionCore, ActionError, ActionState, FnAction, InterruptibleAction, StateKey,
    StateMachine, Transition,
};

pub use config::{ConfigError, MarketConfig, NegotiationConfig, SimulationConfig, WorldConfig};

pub use context::{AgentContext, DeliveryError};

pub use message::{AgentId, ConversationId, Message, MessageId, Performative, Tick};

pub use template::MessageTemplate;

pub use protocol::{
    ContractNetInitiator, ContractNetParticipant, InitiatorPhase, InitiatorPrototype,
    InitiatorStrategy, ParticipantPhase, ParticipantPrototype, ParticipantStrategy,
};

pub use world::{LocalContext, World, WorldError};

pub use observability::{init_metrics, init_tracing, MetricsHandle, TracingConfig, TracingFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{
        Action, ActionError, ActionState, FnAction, InterruptibleAction, StateKey, StateMachine,
        Transition,
    };
    pub use crate::config::{NegotiationConfig, SimulationConfig};
    pub use crate::context::AgentContext;
    pub use crate::message::{AgentId, Message, Performative, Tick};
    pub use crate::protocol::{
        select_uniform, AcceptReply, CallForProposals, CfpReply, ContentError, InitiatorPhase,
        InitiatorPrototype, InitiatorSession, InitiatorStrategy, ParticipantPhase,
        ParticipantPrototype, ParticipantStrategy, ProposalReply,
    };
    pub use crate::template::MessageTemplate;
    pub use crate::world::{LocalContext, World};
    pub use std::sync::Arc;
}
