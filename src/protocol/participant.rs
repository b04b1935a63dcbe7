// protocol/participant.rs - Contract Net, responder side

use super::reply::{AcceptReply, CfpReply, ContentError};
use super::session::{ParticipantSession, SessionError, Step};
use crate::action::{ActionError, InterruptibleAction, StateKey, StateMachine, Transition};
use crate::config::NegotiationConfig;
use crate::context::AgentContext;
use crate::message::{AgentId, Message, Performative};
use crate::observability::{record_negotiation_outcome, Role};
use crate::template::MessageTemplate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const PROTOCOL: &str = "contract-net-participant";

/// Participant phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantPhase {
    CheckRequest,
    WaitForAccept,
    End,
    NoPropose,
    Timeout,
}

impl ParticipantPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantPhase::CheckRequest => "CHECK_REQUEST",
            ParticipantPhase::WaitForAccept => "WAIT_FOR_ACCEPT",
            ParticipantPhase::End => "END",
            ParticipantPhase::NoPropose => "NO_PROPOSE",
            ParticipantPhase::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ParticipantPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateKey for ParticipantPhase {
    fn successors(self) -> &'static [Self] {
        use ParticipantPhase::*;
        match self {
            CheckRequest => &[WaitForAccept, NoPropose],
            WaitForAccept => &[WaitForAccept, End, Timeout],
            End | NoPropose | Timeout => &[],
        }
    }
}

/// Application side of the participant
pub trait ParticipantStrategy: Send + Sync + fmt::Debug {
    fn respond_to_cfp(&self, me: &AgentId, cfp: &Message) -> Result<CfpReply, ContentError>;

    /// Carry out an accepted proposal
    fn respond_to_accept(&self, me: &AgentId, accept: &Message) -> Result<AcceptReply, ContentError>;

    fn on_reject(&self, _me: &AgentId, _reject: &Message) {}
}

/// Responder-side contract net.
///
/// Runs only when a call for proposals on its topic is waiting. Answers to
/// proposals from an earlier activation are cleared out on entry: stale
/// accepts get a FAILURE, stale rejects are dropped.
#[derive(Debug)]
pub struct ContractNetParticipant {
    config: NegotiationConfig,
    strategy: Arc<dyn ParticipantStrategy>,
    session: ParticipantSession,
}

impl ContractNetParticipant {
    pub fn new(config: NegotiationConfig, strategy: Arc<dyn ParticipantStrategy>) -> Self {
        Self {
            config,
            strategy,
            session: ParticipantSession::default(),
        }
    }

    pub fn session(&self) -> &ParticipantSession {
        &self.session
    }

    fn on_topic(&self, performative: Performative) -> MessageTemplate {
        MessageTemplate::performative(performative).and(MessageTemplate::topic(self.config.topic.as_str()))
    }

    /// Answer accepts and drop rejects left over from an earlier activation
    fn clear_stale(&self, me: &AgentId, ctx: &mut dyn AgentContext) -> Vec<Message> {
        let dropped = ctx.pull_messages(&self.on_topic(Performative::RejectProposal)).len();
        if dropped > 0 {
            debug!(dropped, "Dropped stale rejections");
        }

        ctx.pull_messages(&self.on_topic(Performative::AcceptProposal))
            .into_iter()
            .map(|accept| {
                debug!(initiator = %accept.sender(), "Accept arrived after proposal expired");
                accept.reply(
                    me.clone(),
                    Performative::Failure,
                    json!({ "reason": "proposal expired" }),
                )
            })
            .collect()
    }

    fn dispatch(&self, step: Step<ParticipantPhase>, ctx: &mut dyn AgentContext) -> Result<Transition<ParticipantPhase>, ActionError> {
        for message in step.outbound {
            ctx.send_message(message).map_err(|source| ActionError::Delivery {
                action: PROTOCOL.to_string(),
                source,
            })?;
        }
        Ok(step.transition)
    }
}

fn session_error(source: SessionError) -> ActionError {
    ActionError::Session {
        action: PROTOCOL.to_string(),
        source,
    }
}

impl StateMachine for ContractNetParticipant {
    type Key = ParticipantPhase;
    const INITIAL: ParticipantPhase = ParticipantPhase::CheckRequest;

    fn preconditions(&self, ctx: &dyn AgentContext) -> bool {
        ctx.has_message(&self.on_topic(Performative::Cfp))
    }

    fn handle(
        &mut self,
        key: ParticipantPhase,
        ctx: &mut dyn AgentContext,
    ) -> Result<Transition<ParticipantPhase>, ActionError> {
        let me = ctx.agent_id().clone();
        let transition = match key {
            ParticipantPhase::CheckRequest => {
                let stale = self.clear_stale(&me, ctx);
                let requests = ctx.pull_messages(&self.on_topic(Performative::Cfp));
                debug!(requests = requests.len(), "Checking calls for proposals");
                let mut step = self.session.answer_requests(requests, &me, self.strategy.as_ref());
                step.outbound.extend(stale);
                self.dispatch(step, ctx)?
            }
            ParticipantPhase::WaitForAccept => {
                let answers = MessageTemplate::reply_to_ids(self.session.pending_proposals().iter().copied());
                let inbound = ctx.pull_messages(&answers);
                let step = self
                    .session
                    .collect_answers(inbound, &me, self.strategy.as_ref(), self.config.accept_timeout_ticks)
                    .map_err(session_error)?;
                self.dispatch(step, ctx)?
            }
            ParticipantPhase::End | ParticipantPhase::NoPropose | ParticipantPhase::Timeout => {
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
                proposed = self.session.proposed(),
                accepted = self.session.accepted(),
                rejected = self.session.rejected(),
                "Negotiation finished"
            );
            record_negotiation_outcome(Role::Participant, end.as_str());
        }
        Ok(transition)
    }

    fn reset(&mut self) {
        self.session = ParticipantSession::default();
    }
}

/// Immutable participant template
#[derive(Debug, Clone)]
pub struct ParticipantPrototype {
    config: NegotiationConfig,
    strategy: Arc<dyn ParticipantStrategy>,
}

impl ParticipantPrototype {
    pub fn new(config: NegotiationConfig, strategy: Arc<dyn ParticipantStrategy>) -> Self {
        Self { config, strategy }
    }

    pub fn instantiate(&self, name: impl Into<String>) -> InterruptibleAction<ContractNetParticipant> {
        InterruptibleAction::new(
            name,
            ContractNetParticipant::new(self.config.clone(), Arc::clone(&self.strategy)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionState};
    use crate::world::LocalContext;
    use serde_json::Value;

    /// Proposes its fixed price; fulfils every accept
    #[derive(Debug)]
    struct FixedPrice(u32);

    impl ParticipantStrategy for FixedPrice {
        fn respond_to_cfp(&self, _me: &AgentId, cfp: &Message) -> Result<CfpReply, ContentError> {
            let want: u32 = cfp.decode()?;
            if want > 0 {
                Ok(CfpReply::Propose(json!(self.0)))
            } else {
                Ok(CfpReply::Refuse(json!("nothing requested")))
            }
        }

        fn respond_to_accept(&self, _me: &AgentId, _accept: &Message) -> Result<AcceptReply, ContentError> {
            Ok(AcceptReply::Inform(json!("delivered")))
        }
    }

    fn cfp(payload: Value) -> Message {
        Message::new(Performative::Cfp, AgentId::new("buyer"))
            .with_receiver(AgentId::new("seller"))
            .with_topic("trade")
            .with_payload(payload)
    }

    fn action() -> InterruptibleAction<ContractNetParticipant> {
        ParticipantPrototype::new(NegotiationConfig::default(), Arc::new(FixedPrice(7))).instantiate("sell")
    }

    #[test]
    fn test_adjacency_table() {
        use ParticipantPhase::*;
        for terminal in [End, NoPropose, Timeout] {
            assert!(terminal.is_terminal());
        }
        assert!(!CheckRequest.successors().contains(&End));
        assert!(!WaitForAccept.successors().contains(&CheckRequest));
        assert!(!WaitForAccept.successors().contains(&NoPropose));
        assert_eq!(WaitForAccept.to_string(), "WAIT_FOR_ACCEPT");
    }

    #[test]
    fn test_waits_for_call_on_topic() {
        let mut ctx = LocalContext::new("seller", 0);
        let mut action = action();
        assert_eq!(action.check_preconditions(&ctx).unwrap(), ActionState::PreconditionsFailed);

        action.reset();
        ctx.deliver(cfp(json!(1)).with_topic("weather"));
        assert_eq!(action.check_preconditions(&ctx).unwrap(), ActionState::PreconditionsFailed);

        action.reset();
        ctx.deliver(cfp(json!(1)));
        assert_eq!(action.check_preconditions(&ctx).unwrap(), ActionState::PreconditionsMet);
    }

    #[test]
    fn test_propose_then_inform() {
        let mut ctx = LocalContext::new("seller", 0);
        let mut action = action();
        let request = cfp(json!(2));
        ctx.deliver(request.clone());

        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Intermediate);
        let proposal = ctx.take_sent().remove(0);
        assert_eq!(proposal.performative(), Performative::Propose);
        assert_eq!(proposal.in_reply_to(), Some(request.id()));
        assert_eq!(action.machine().session().expected_accept_answers(), 1);

        ctx.deliver(proposal.reply(AgentId::new("buyer"), Performative::AcceptProposal, Value::Null));
        ctx.set_tick(2);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Completed);
        assert_eq!(action.end_key(), Some(ParticipantPhase::End));

        let inform = ctx.take_sent().remove(0);
        assert_eq!(inform.performative(), Performative::Inform);
        assert_eq!(inform.receivers(), &[AgentId::new("buyer")]);
    }

    #[test]
    fn test_refusal_ends_with_no_propose() {
        let mut ctx = LocalContext::new("seller", 0);
        let mut action = action();
        ctx.deliver(cfp(json!(0)));
        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);

        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Aborted);
        assert_eq!(action.end_key(), Some(ParticipantPhase::NoPropose));
        assert_eq!(ctx.sent()[0].performative(), Performative::Refuse);
    }

    #[test]
    fn test_malformed_cfp_not_understood() {
        let mut ctx = LocalContext::new("seller", 0);
        let mut action = action();
        ctx.deliver(cfp(json!({"garbled": true})));
        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);

        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Aborted);
        assert_eq!(ctx.sent()[0].performative(), Performative::NotUnderstood);
    }

    #[test]
    fn test_accept_timeout() {
        let mut ctx = LocalContext::new("seller", 0);
        let mut action = action();
        ctx.deliver(cfp(json!(1)));
        action.check_preconditions(&ctx).unwrap();

        let mut states = Vec::new();
        for tick in 1..=4 {
            ctx.set_tick(tick);
            states.push(action.apply(&mut ctx).unwrap());
        }
        // propose, wait, wait, budget of 2 exceeded
        assert_eq!(
            states,
            vec![
                ActionState::Intermediate,
                ActionState::Intermediate,
                ActionState::Intermediate,
                ActionState::Aborted
            ]
        );
        assert_eq!(action.end_key(), Some(ParticipantPhase::Timeout));
    }

    #[test]
    fn test_stale_answers_cleared() {
        let mut ctx = LocalContext::new("seller", 0);
        let mut action = action();
        let old_proposal = Message::new(Performative::Propose, AgentId::new("seller"))
            .with_receiver(AgentId::new("buyer"))
            .with_topic("trade");
        ctx.deliver(old_proposal.reply(AgentId::new("buyer"), Performative::AcceptProposal, Value::Null));
        ctx.deliver(old_proposal.reply(AgentId::new("buyer"), Performative::RejectProposal, Value::Null));
        ctx.deliver(cfp(json!(1)));

        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);
        action.apply(&mut ctx).unwrap();

        let sent = ctx.take_sent();
        let performatives: Vec<_> = sent.iter().map(|m| m.performative()).collect();
        assert_eq!(performatives, vec![Performative::Propose, Performative::Failure]);
        assert!(ctx.inbox().is_empty());
    }
}
