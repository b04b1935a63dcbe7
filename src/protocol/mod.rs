// protocol/mod.rs - FIPA Contract Net over tick-driven actions

//! FIPA Contract Net interaction protocol, both roles.
//!
//! Each role is a [`StateMachine`](crate::action::StateMachine) run by an
//! [`InterruptibleAction`](crate::action::InterruptibleAction): one phase
//! evaluation per tick, suspended in between.
//!
//! ```text
//! Initiator                               Participant
//! ---------                               -----------
//! SEND_REQUEST ──── CFP ───────────────>  CHECK_REQUEST
//! WAIT_FOR_PROPOSALS <── PROPOSE/REFUSE ─┘     │ no proposal -> NO_PROPOSE
//!   │ ──── ACCEPT/REJECT ─────────────>  WAIT_FOR_ACCEPT
//! WAIT_FOR_CONFIRMATION <── INFORM/FAILURE ┘   │ -> END | TIMEOUT
//!   │ -> END | TIMEOUT
//! ```
//!
//! Failure keys: `NO_RECEIVERS` (nobody to ask), `NO_PROPOSE` (nothing
//! offered), `TIMEOUT` (phase budget exceeded). Timeouts are counted in ticks
//! and reset on every phase change.
//!
//! Protocol logic lives in the serializable sessions ([`InitiatorSession`],
//! [`ParticipantSession`]) as pure per-phase functions; the state machines
//! only pull messages, call them and send what they return. Application
//! decisions come from an [`InitiatorStrategy`] or [`ParticipantStrategy`],
//! shared between agents through a prototype.
//!
//! # Example
//!
//! ```ignore
//! use fipa_tick_agents::prelude::*;
//!
//! let buyers = InitiatorPrototype::new(NegotiationConfig::default(), Arc::new(MyBuyer));
//! world.add_agent(AgentId::new("buyer-0"), Box::new(buyers.instantiate("buy")))?;
//! ```

mod initiator;
mod participant;
mod reply;
mod session;

pub use initiator::{
    select_uniform, CallForProposals, ContractNetInitiator, InitiatorPhase, InitiatorPrototype,
    InitiatorStrategy,
};
pub use participant::{
    ContractNetParticipant, ParticipantPhase, ParticipantPrototype, ParticipantStrategy,
};
pub use reply::{
    build_reply, not_understood, AcceptReply, BuiltReply, CfpReply, ContentError, ProposalReply,
    ReplyKind,
};
pub use session::{InitiatorSession, ParticipantSession, SessionError, Step};
