// protocol/initiator.rs - Contract Net, requester side

use super::reply::{ContentError, ProposalReply};
use super::session::{InitiatorSession, SessionError, Step};
use crate::action::{ActionError, InterruptibleAction, StateKey, StateMachine, Transition};
use crate::config::NegotiationConfig;
use crate::context::AgentContext;
use crate::message::{AgentId, Message, Performative};
use crate::observability::{record_negotiation_outcome, Role};
use crate::template::MessageTemplate;
use rand::seq::IndexedRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const PROTOCOL: &str = "contract-net-initiator";

/// Performatives an initiator receives in answer to its own messages
const REPLIES: [Performative; 5] = [
    Performative::Propose,
    Performative::Refuse,
    Performative::NotUnderstood,
    Performative::Inform,
    Performative::Failure,
];

/// Initiator phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitiatorPhase {
    SendRequest,
    WaitForProposals,
    WaitForConfirmation,
    End,
    Timeout,
    NoReceivers,
}

impl InitiatorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitiatorPhase::SendRequest => "SEND_REQUEST",
            InitiatorPhase::WaitForProposals => "WAIT_FOR_PROPOSALS",
            InitiatorPhase::WaitForConfirmation => "WAIT_FOR_CONFIRMATION",
            InitiatorPhase::End => "END",
            InitiatorPhase::Timeout => "TIMEOUT",
            InitiatorPhase::NoReceivers => "NO_RECEIVERS",
        }
    }
}

impl fmt::Display for InitiatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateKey for InitiatorPhase {
    fn successors(self) -> &'static [Self] {
        use InitiatorPhase::*;
        match self {
            SendRequest => &[WaitForProposals, NoReceivers],
            WaitForProposals => &[WaitForProposals, WaitForConfirmation, End, Timeout],
            WaitForConfirmation => &[WaitForConfirmation, End, Timeout],
            End | Timeout | NoReceivers => &[],
        }
    }
}

/// What to ask and whom
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallForProposals {
    pub recipients: Vec<AgentId>,
    pub payload: Value,
}

/// Application side of the initiator
pub trait InitiatorStrategy: Send + Sync + fmt::Debug {
    /// Whether a new negotiation should start this activation
    fn preconditions(&self, _ctx: &dyn AgentContext) -> bool {
        true
    }

    /// Pick the candidates and the request. An empty recipient list ends the
    /// activation with `NO_RECEIVERS`.
    fn call_for_proposals(&self, ctx: &mut dyn AgentContext) -> CallForProposals;

    /// Accept or reject one proposal. `session` reflects the proposals
    /// handled before this one in delivery order.
    fn evaluate_proposal(
        &self,
        me: &AgentId,
        proposal: &Message,
        session: &InitiatorSession,
    ) -> Result<ProposalReply, ContentError>;

    fn on_inform(&self, _me: &AgentId, _inform: &Message) {}

    /// FAILURE or NOT-UNDERSTOOD in answer to an accept
    fn on_failure(&self, _me: &AgentId, _reply: &Message) {}
}

/// Pick up to `n` distinct candidates uniformly at random
pub fn select_uniform(candidates: &[AgentId], n: usize, rng: &mut dyn RngCore) -> Vec<AgentId> {
    candidates.choose_multiple(rng, n).cloned().collect()
}

/// Requester-side contract net
#[derive(Debug)]
pub struct ContractNetInitiator {
    config: NegotiationConfig,
    strategy: Arc<dyn InitiatorStrategy>,
    session: InitiatorSession,
}

impl ContractNetInitiator {
    pub fn new(config: NegotiationConfig, strategy: Arc<dyn InitiatorStrategy>) -> Self {
        Self {
            config,
            strategy,
            session: InitiatorSession::default(),
        }
    }

    pub fn session(&self) -> &InitiatorSession {
        &self.session
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    fn send_request(&mut self, ctx: &mut dyn AgentContext) -> Result<Transition<InitiatorPhase>, ActionError> {
        self.session = InitiatorSession::default();
        let me = ctx.agent_id().clone();
        let stale = self.clear_stale(&me, ctx);
        self.send_all(stale, ctx)?;
        let CallForProposals { recipients, payload } = self.strategy.call_for_proposals(ctx);
        if recipients.is_empty() {
            return Ok(Transition::Fail(InitiatorPhase::NoReceivers));
        }

        let cfp = Message::new(Performative::Cfp, ctx.agent_id().clone())
            .with_receivers(recipients)
            .with_topic(self.config.topic.as_str())
            .with_payload(payload);
        self.session.open(&cfp);
        info!(
            topic = %self.config.topic,
            recipients = cfp.receivers().len(),
            "Call for proposals sent"
        );
        ctx.send_message(cfp).map_err(|source| ActionError::Delivery {
            action: PROTOCOL.to_string(),
            source,
        })?;
        Ok(Transition::Next(InitiatorPhase::WaitForProposals))
    }

    /// Drain replies on this topic that belong to a finished conversation.
    /// Late PROPOSEs are rejected so their senders stop waiting; the rest is
    /// dropped.
    fn clear_stale(&self, me: &AgentId, ctx: &mut dyn AgentContext) -> Vec<Message> {
        let mut stale = MessageTemplate::any_of(REPLIES.map(MessageTemplate::performative))
            .and(MessageTemplate::topic(self.config.topic.as_str()));
        if let Some(current) = self.session.conversation_id() {
            stale = stale.and(MessageTemplate::conversation(current).not());
        }

        let mut rejections = Vec::new();
        for message in ctx.pull_messages(&stale) {
            debug!(
                sender = %message.sender(),
                performative = %message.performative(),
                "Dropped reply to a finished negotiation"
            );
            if message.performative() == Performative::Propose {
                rejections.push(message.reply(me.clone(), Performative::RejectProposal, json!({ "reason": "late" })));
            }
        }
        rejections
    }

    fn send_all(&self, messages: Vec<Message>, ctx: &mut dyn AgentContext) -> Result<(), ActionError> {
        for message in messages {
            ctx.send_message(message).map_err(|source| ActionError::Delivery {
                action: PROTOCOL.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    fn request_template(&self) -> MessageTemplate {
        MessageTemplate::reply_to_ids(self.session.request_id())
    }

    fn dispatch(&self, step: Step<InitiatorPhase>, ctx: &mut dyn AgentContext) -> Result<Transition<InitiatorPhase>, ActionError> {
        self.send_all(step.outbound, ctx)?;
        Ok(step.transition)
    }
}

fn session_error(source: SessionError) -> ActionError {
    ActionError::Session {
        action: PROTOCOL.to_string(),
        source,
    }
}

impl StateMachine for ContractNetInitiator {
    type Key = InitiatorPhase;
    const INITIAL: InitiatorPhase = InitiatorPhase::SendRequest;

    fn preconditions(&self, ctx: &dyn AgentContext) -> bool {
        self.strategy.preconditions(ctx)
    }

    fn handle(
        &mut self,
        key: InitiatorPhase,
        ctx: &mut dyn AgentContext,
    ) -> Result<Transition<InitiatorPhase>, ActionError> {
        let me = ctx.agent_id().clone();
        let transition = match key {
            InitiatorPhase::SendRequest => self.send_request(ctx)?,
            InitiatorPhase::WaitForProposals => {
                let stale = self.clear_stale(&me, ctx);
                self.send_all(stale, ctx)?;
                let inbound = ctx.pull_messages(&self.request_template());
                let step = self
                    .session
                    .collect_proposals(inbound, &me, self.strategy.as_ref(), self.config.proposal_timeout_ticks)
                    .map_err(session_error)?;
                if step.transition.key() == InitiatorPhase::WaitForConfirmation {
                    debug!(
                        received = self.session.received(),
                        accepted = self.session.accepted(),
                        "Waiting for confirmations"
                    );
                }
                self.dispatch(step, ctx)?
            }
            InitiatorPhase::WaitForConfirmation => {
                let stale = self.clear_stale(&me, ctx);
                self.send_all(stale, ctx)?;
                let confirmations = MessageTemplate::reply_to_ids(self.session.confirmation_ids());
                let inbound = ctx.pull_messages(&confirmations);
                let late = ctx.pull_messages(&self.request_template());
                let step = self
                    .session
                    .collect_confirmations(
                        inbound,
                        late,
                        &me,
                        self.strategy.as_ref(),
                        self.config.confirmation_timeout_ticks,
                    )
                    .map_err(session_error)?;
                self.dispatch(step, ctx)?
            }
            InitiatorPhase::End | InitiatorPhase::Timeout | InitiatorPhase::NoReceivers => {
                return Err(ActionError::UnhandledState {
                    action: PROTOCOL.to_string(),
                    key: key.to_string(),
                });
            }
        };

        if transition.is_terminal() {
            let end = transition.key();
            info!(
                end = %end,
                expected = self.session.expected(),
                received = self.session.received(),
                answered = self.session.answered(),
                "Negotiation finished"
            );
            record_negotiation_outcome(Role::Initiator, end.as_str());
        }
        Ok(transition)
    }

    fn reset(&mut self) {
        self.session = InitiatorSession::default();
    }
}

/// Immutable initiator template; every instance starts with a fresh session
#[derive(Debug, Clone)]
pub struct InitiatorPrototype {
    config: NegotiationConfig,
    strategy: Arc<dyn InitiatorStrategy>,
}

impl InitiatorPrototype {
    pub fn new(config: NegotiationConfig, strategy: Arc<dyn InitiatorStrategy>) -> Self {
        Self { config, strategy }
    }

    pub fn instantiate(&self, name: impl Into<String>) -> InterruptibleAction<ContractNetInitiator> {
        InterruptibleAction::new(
            name,
            ContractNetInitiator::new(self.config.clone(), Arc::clone(&self.strategy)),
        )
    }
}
