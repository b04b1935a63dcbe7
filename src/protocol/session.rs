// protocol/session.rs - Negotiation session state
//
//! Per-activation protocol state, kept apart from the state machines that
//! drive it.
//!
//! A session is a plain serializable value. Each `collect_*`/`answer_*`
//! method is the transition function for one phase: it takes the messages
//! pulled this tick, updates the counters and returns the next transition
//! together with the replies to send. None of them touch a mailbox, so the
//! protocol logic runs without a scheduler.
//!
//! Counter invariants, checked on every update:
//! - initiator: `answered <= accepted <= received <= expected`
//! - participant: `answered <= proposed`

use super::initiator::{InitiatorPhase, InitiatorStrategy};
use super::participant::{ParticipantPhase, ParticipantStrategy};
use super::reply::{build_reply, not_understood, BuiltReply};
use crate::action::Transition;
use crate::message::{AgentId, ConversationId, Message, MessageId, Performative};
use crate::observability::Role;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Counter invariant violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("counter '{0}' would become negative")]
    Underflow(&'static str),

    #[error("counter '{counter}' would exceed '{bound}'")]
    Overflow {
        counter: &'static str,
        bound: &'static str,
    },
}

/// Result of one phase evaluation
#[derive(Debug, Clone)]
pub struct Step<K> {
    pub transition: Transition<K>,
    pub outbound: Vec<Message>,
}

impl<K> Step<K> {
    fn new(transition: Transition<K>, outbound: Vec<Message>) -> Self {
        Self {
            transition,
            outbound,
        }
    }
}

/// Requester-side counters and correlation state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatorSession {
    request: Option<MessageId>,
    conversation: Option<ConversationId>,
    /// Recipients that have not answered the CFP yet
    outstanding: Vec<AgentId>,
    expected: u32,
    received: u32,
    accepted: u32,
    answered: u32,
    timeout_ticks: u32,
    /// ACCEPT-PROPOSAL ids still waiting for INFORM/FAILURE
    pending_confirmations: Vec<MessageId>,
    informed: Vec<AgentId>,
    failed: Vec<AgentId>,
}

impl InitiatorSession {
    /// Start a conversation for the CFP just built
    pub fn open(&mut self, cfp: &Message) {
        *self = Self {
            request: Some(cfp.id()),
            conversation: Some(cfp.conversation_id()),
            outstanding: cfp.receivers().to_vec(),
            expected: cfp.receivers().len() as u32,
            ..Self::default()
        };
    }

    pub fn request_id(&self) -> Option<MessageId> {
        self.request
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation
    }

    /// Partners still in consideration
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Understood proposals
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Proposals answered with ACCEPT-PROPOSAL
    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    /// Confirmations (INFORM, FAILURE, NOT-UNDERSTOOD) received
    pub fn answered(&self) -> u32 {
        self.answered
    }

    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    pub fn pending_confirmations(&self) -> &[MessageId] {
        &self.pending_confirmations
    }

    /// Partners that confirmed with INFORM
    pub fn informed(&self) -> &[AgentId] {
        &self.informed
    }

    /// Partners that answered an accept with FAILURE or NOT-UNDERSTOOD
    pub fn failed(&self) -> &[AgentId] {
        &self.failed
    }

    fn take_outstanding(&mut self, sender: &AgentId) -> bool {
        match self.outstanding.iter().position(|a| a == sender) {
            Some(idx) => {
                self.outstanding.remove(idx);
                true
            }
            None => false,
        }
    }

    fn drop_candidate(&mut self) -> Result<(), SessionError> {
        if self.expected <= self.received {
            return Err(SessionError::Underflow("expected"));
        }
        self.expected -= 1;
        Ok(())
    }

    fn record_proposal(&mut self, reply: &Message) -> Result<(), SessionError> {
        if self.received >= self.expected {
            return Err(SessionError::Overflow {
                counter: "received",
                bound: "expected",
            });
        }
        self.received += 1;
        if reply.performative() == Performative::AcceptProposal {
            self.accepted += 1;
            self.pending_confirmations.push(reply.id());
        }
        Ok(())
    }

    fn record_confirmation(&mut self) -> Result<(), SessionError> {
        if self.answered >= self.accepted {
            return Err(SessionError::Overflow {
                counter: "answered",
                bound: "accepted",
            });
        }
        self.answered += 1;
        Ok(())
    }

    /// WAIT_FOR_PROPOSALS: handle replies to the CFP pulled this tick.
    ///
    /// PROPOSE is evaluated by the strategy; REFUSE, NOT-UNDERSTOOD and
    /// anything unexpected remove the sender from consideration. Malformed
    /// proposals are answered NOT-UNDERSTOOD. Replies from agents that were
    /// not asked, or already answered, are ignored.
    pub fn collect_proposals(
        &mut self,
        inbound: Vec<Message>,
        me: &AgentId,
        strategy: &dyn InitiatorStrategy,
        timeout_budget: u32,
    ) -> Result<Step<InitiatorPhase>, SessionError> {
        let mut outbound = Vec::new();
        self.timeout_ticks += 1;

        for msg in inbound {
            if !self.take_outstanding(msg.sender()) {
                warn!(sender = %msg.sender(), performative = %msg.performative(), "Ignoring reply from agent not awaited");
                continue;
            }

            match msg.performative() {
                Performative::Propose => {
                    let outcome = strategy.evaluate_proposal(me, &msg, self);
                    match build_reply(&msg, me, outcome, Role::Initiator) {
                        BuiltReply::Understood(reply) => {
                            debug!(sender = %msg.sender(), reply = %reply.performative(), "Proposal answered");
                            self.record_proposal(&reply)?;
                            outbound.push(reply);
                        }
                        BuiltReply::NotUnderstood(reply) => {
                            self.drop_candidate()?;
                            outbound.push(reply);
                        }
                    }
                }
                Performative::Refuse => {
                    debug!(sender = %msg.sender(), "Proposal refused");
                    self.drop_candidate()?;
                }
                Performative::NotUnderstood => {
                    debug!(sender = %msg.sender(), "Call for proposals not understood");
                    self.drop_candidate()?;
                }
                other => {
                    outbound.push(not_understood(
                        &msg,
                        me,
                        &format!("unexpected {} while collecting proposals", other),
                        Role::Initiator,
                    ));
                    self.drop_candidate()?;
                }
            }
        }

        let transition = if self.expected == 0 {
            debug!("Every candidate dropped out");
            Transition::End(InitiatorPhase::End)
        } else if self.received == self.expected || self.timeout_ticks > timeout_budget {
            if self.received == 0 {
                Transition::Fail(InitiatorPhase::Timeout)
            } else if self.accepted == 0 {
                debug!(received = self.received, "No proposal accepted");
                Transition::End(InitiatorPhase::End)
            } else {
                self.timeout_ticks = 0;
                Transition::Next(InitiatorPhase::WaitForConfirmation)
            }
        } else {
            Transition::Next(InitiatorPhase::WaitForProposals)
        };

        Ok(Step::new(transition, outbound))
    }

    /// Template ids for WAIT_FOR_CONFIRMATION
    pub fn confirmation_ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.pending_confirmations.iter().copied()
    }

    /// WAIT_FOR_CONFIRMATION: handle answers to the accepted proposals.
    ///
    /// `late` are proposals to the CFP that arrived after the proposal phase
    /// closed; they are rejected and not counted.
    pub fn collect_confirmations(
        &mut self,
        inbound: Vec<Message>,
        late: Vec<Message>,
        me: &AgentId,
        strategy: &dyn InitiatorStrategy,
        timeout_budget: u32,
    ) -> Result<Step<InitiatorPhase>, SessionError> {
        let mut outbound = Vec::new();
        self.timeout_ticks += 1;

        for msg in late {
            if msg.performative() == Performative::Propose {
                debug!(sender = %msg.sender(), "Rejecting late proposal");
                outbound.push(msg.reply(
                    me.clone(),
                    Performative::RejectProposal,
                    json!({ "reason": "late" }),
                ));
            }
        }

        for msg in inbound {
            let Some(position) = msg
                .in_reply_to()
                .and_then(|id| self.pending_confirmations.iter().position(|p| *p == id))
            else {
                warn!(sender = %msg.sender(), "Ignoring duplicate confirmation");
                continue;
            };
            self.pending_confirmations.remove(position);

            match msg.performative() {
                Performative::Inform => {
                    debug!(sender = %msg.sender(), "Accepted proposal fulfilled");
                    strategy.on_inform(me, &msg);
                    self.informed.push(msg.sender().clone());
                }
                other => {
                    debug!(sender = %msg.sender(), performative = %other, "Accepted proposal not fulfilled");
                    strategy.on_failure(me, &msg);
                    self.failed.push(msg.sender().clone());
                }
            }
            self.record_confirmation()?;
        }

        let transition = if self.answered == self.accepted {
            Transition::End(InitiatorPhase::End)
        } else if self.timeout_ticks > timeout_budget {
            Transition::Fail(InitiatorPhase::Timeout)
        } else {
            Transition::Next(InitiatorPhase::WaitForConfirmation)
        };

        Ok(Step::new(transition, outbound))
    }
}

/// Responder-side counters and correlation state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSession {
    /// PROPOSE ids still waiting for ACCEPT/REJECT
    pending_proposals: Vec<MessageId>,
    proposed: u32,
    answered: u32,
    accepted: u32,
    rejected: u32,
    timeout_ticks: u32,
}

impl ParticipantSession {
    pub fn proposed(&self) -> u32 {
        self.proposed
    }

    /// Proposals still waiting for an answer
    pub fn expected_accept_answers(&self) -> u32 {
        self.proposed - self.answered
    }

    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    pub fn pending_proposals(&self) -> &[MessageId] {
        &self.pending_proposals
    }

    fn record_answer(&mut self) -> Result<(), SessionError> {
        if self.answered >= self.proposed {
            return Err(SessionError::Underflow("expected_accept_answers"));
        }
        self.answered += 1;
        Ok(())
    }

    /// CHECK_REQUEST: answer every call for proposals pulled this tick
    pub fn answer_requests(
        &mut self,
        requests: Vec<Message>,
        me: &AgentId,
        strategy: &dyn ParticipantStrategy,
    ) -> Step<ParticipantPhase> {
        *self = Self::default();
        let mut outbound = Vec::new();

        for cfp in requests {
            let outcome = strategy.respond_to_cfp(me, &cfp);
            let built = build_reply(&cfp, me, outcome, Role::Participant);
            let reply = built.message();
            debug!(initiator = %cfp.sender(), reply = %reply.performative(), "Call for proposals answered");
            if reply.performative() == Performative::Propose {
                self.pending_proposals.push(reply.id());
                self.proposed += 1;
            }
            outbound.push(built.into_message());
        }

        let transition = if self.proposed == 0 {
            Transition::Fail(ParticipantPhase::NoPropose)
        } else {
            Transition::Next(ParticipantPhase::WaitForAccept)
        };
        Step::new(transition, outbound)
    }

    /// WAIT_FOR_ACCEPT: handle answers to our proposals
    pub fn collect_answers(
        &mut self,
        inbound: Vec<Message>,
        me: &AgentId,
        strategy: &dyn ParticipantStrategy,
        timeout_budget: u32,
    ) -> Result<Step<ParticipantPhase>, SessionError> {
        let mut outbound = Vec::new();
        self.timeout_ticks += 1;

        for msg in inbound {
            let Some(position) = msg
                .in_reply_to()
                .and_then(|id| self.pending_proposals.iter().position(|p| *p == id))
            else {
                warn!(sender = %msg.sender(), "Ignoring duplicate answer to proposal");
                continue;
            };
            self.pending_proposals.remove(position);

            match msg.performative() {
                Performative::AcceptProposal => {
                    self.accepted += 1;
                    let outcome = strategy.respond_to_accept(me, &msg);
                    let reply = build_reply(&msg, me, outcome, Role::Participant).into_message();
                    debug!(initiator = %msg.sender(), reply = %reply.performative(), "Accepted proposal answered");
                    outbound.push(reply);
                }
                Performative::RejectProposal => {
                    self.rejected += 1;
                    debug!(initiator = %msg.sender(), "Proposal rejected");
                    strategy.on_reject(me, &msg);
                }
                other => {
                    debug!(initiator = %msg.sender(), performative = %other, "Proposal answered without decision");
                }
            }
            self.record_answer()?;
        }

        let transition = if self.expected_accept_answers() == 0 {
            Transition::End(ParticipantPhase::End)
        } else if self.timeout_ticks > timeout_budget {
            Transition::Fail(ParticipantPhase::Timeout)
        } else {
            Transition::Next(ParticipantPhase::WaitForAccept)
        };
        Ok(Step::new(transition, outbound))
    }
}
