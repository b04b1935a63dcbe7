// world.rs - In-process tick loop and message delivery
//
//! A minimal single-threaded simulation harness.
//!
//! - [`Mailbox`] queues messages delivered to one agent.
//! - [`PostOffice`] owns every mailbox and delivers immediately: a message
//!   sent during tick *t* is visible to recipients that run later in tick *t*
//!   and to every recipient from tick *t + 1* on.
//! - [`World`] owns the agents, each with exactly one action, and steps them
//!   in registration order once per tick.
//! - [`LocalContext`] is a standalone single-agent context for driving an
//!   action by hand (unit tests, tools).

use crate::action::{Action, ActionError, ActionState};
use crate::config::WorldConfig;
use crate::context::{AgentContext, DeliveryError};
use crate::message::{AgentId, Message, Performative, Tick};
use crate::observability::{record_message_sent, record_tick};
use crate::template::MessageTemplate;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

/// World errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorldError {
    #[error("agent already registered: {0}")]
    DuplicateAgent(AgentId),

    #[error("agent not found: {0}")]
    UnknownAgent(AgentId),

    #[error("agent '{agent}' failed at tick {tick}: {source}")]
    Action {
        agent: AgentId,
        tick: Tick,
        #[source]
        source: ActionError,
    },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// FIFO of messages delivered to one agent
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    queue: VecDeque<Message>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    pub fn contains(&self, template: &MessageTemplate) -> bool {
        self.queue.iter().any(|m| template.matches(m))
    }

    /// Remove and return matching messages, oldest first
    pub fn pull(&mut self, template: &MessageTemplate) -> Vec<Message> {
        let mut pulled = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for message in self.queue.drain(..) {
            if template.matches(&message) {
                pulled.push(message);
            } else {
                kept.push_back(message);
            }
        }
        self.queue = kept;
        pulled
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Delivered message as seen by the log
#[derive(Debug, Clone)]
pub struct LoggedMessage {
    pub tick: Tick,
    pub message: Message,
}

/// Bounded record of delivered messages
#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: VecDeque<LoggedMessage>,
    capacity: usize,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    fn record(&mut self, tick: Tick, message: &Message) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LoggedMessage {
            tick,
            message: message.clone(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &LoggedMessage> {
        self.entries.iter()
    }

    pub fn count(&self, performative: Performative) -> usize {
        self.entries
            .iter()
            .filter(|e| e.message.performative() == performative)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Mailboxes of every registered agent
#[derive(Debug, Default)]
pub struct PostOffice {
    mailboxes: HashMap<AgentId, Mailbox>,
    log: MessageLog,
}

impl PostOffice {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            mailboxes: HashMap::new(),
            log: MessageLog::new(log_capacity),
        }
    }

    pub fn register(&mut self, agent: AgentId) {
        self.mailboxes.entry(agent).or_default();
    }

    pub fn mailbox(&self, agent: &AgentId) -> Option<&Mailbox> {
        self.mailboxes.get(agent)
    }

    pub fn mailbox_mut(&mut self, agent: &AgentId) -> Option<&mut Mailbox> {
        self.mailboxes.get_mut(agent)
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Deliver to every known recipient. Returns how many mailboxes received it.
    pub fn deliver(&mut self, message: Message, tick: Tick) -> Result<usize, DeliveryError> {
        if message.receivers().is_empty() {
            return Err(DeliveryError::NoRecipients {
                message: message.id().to_string(),
                sender: message.sender().clone(),
            });
        }

        let mut delivered = 0;
        for receiver in message.receivers() {
            match self.mailboxes.get_mut(receiver) {
                Some(mailbox) => {
                    mailbox.push(message.clone());
                    delivered += 1;
                }
                None => warn!(
                    receiver = %receiver,
                    sender = %message.sender(),
                    "Dropping message for unknown agent"
                ),
            }
        }

        trace!(
            performative = %message.performative(),
            sender = %message.sender(),
            delivered,
            tick,
            "Message delivered"
        );
        record_message_sent(message.performative());
        self.log.record(tick, &message);
        Ok(delivered)
    }
}

/// Context handed to one agent's action during a world tick
struct TickContext<'a> {
    agent: &'a AgentId,
    tick: Tick,
    roster: &'a [AgentId],
    post: &'a mut PostOffice,
    rng: &'a mut StdRng,
}

impl AgentContext for TickContext<'_> {
    fn agent_id(&self) -> &AgentId {
        self.agent
    }

    fn current_tick(&self) -> Tick {
        self.tick
    }

    fn peers(&self) -> Vec<AgentId> {
        self.roster
            .iter()
            .filter(|id| *id != self.agent)
            .cloned()
            .collect()
    }

    fn has_message(&self, template: &MessageTemplate) -> bool {
        self.post
            .mailbox(self.agent)
            .map(|m| m.contains(template))
            .unwrap_or(false)
    }

    fn pull_messages(&mut self, template: &MessageTemplate) -> Vec<Message> {
        self.post
            .mailbox_mut(self.agent)
            .map(|m| m.pull(template))
            .unwrap_or_default()
    }

    fn send_message(&mut self, message: Message) -> Result<(), DeliveryError> {
        self.post.deliver(message, self.tick).map(|_| ())
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        self.rng
    }
}

#[derive(Debug)]
struct AgentSlot {
    id: AgentId,
    action: Box<dyn Action>,
}

/// Single-threaded tick loop over a population of agents.
///
/// Owner policy per agent and tick: a terminal (or precondition-failed)
/// action is reset when restarts are enabled, otherwise left alone; an
/// `Initial` action has its preconditions checked; then the action is applied
/// once. A `Failed` action is never restarted automatically; it stays parked
/// until [`World::reset_agent`].
#[derive(Debug)]
pub struct World {
    tick: Tick,
    post: PostOffice,
    agents: Vec<AgentSlot>,
    roster: Vec<AgentId>,
    rng: StdRng,
    restart_finished: bool,
}

impl World {
    pub fn new(seed: u64) -> Self {
        Self {
            tick: 0,
            post: PostOffice::default(),
            agents: Vec::new(),
            roster: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            restart_finished: true,
        }
    }

    pub fn from_config(config: &WorldConfig) -> Self {
        Self {
            post: PostOffice::new(config.message_log_capacity),
            restart_finished: config.restart_finished_actions,
            ..Self::new(config.seed)
        }
    }

    /// Whether owners reset finished actions at the start of the next tick
    pub fn with_restarts(mut self, restart: bool) -> Self {
        self.restart_finished = restart;
        self
    }

    pub fn add_agent(&mut self, id: AgentId, action: Box<dyn Action>) -> Result<(), WorldError> {
        if self.roster.contains(&id) {
            return Err(WorldError::DuplicateAgent(id));
        }
        debug!(agent = %id, action = %action.name(), "Agent registered");
        self.post.register(id.clone());
        self.roster.push(id.clone());
        self.agents.push(AgentSlot { id, action });
        Ok(())
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    pub fn agent_ids(&self) -> &[AgentId] {
        &self.roster
    }

    pub fn action(&self, id: &AgentId) -> Option<&dyn Action> {
        self.agents
            .iter()
            .find(|slot| &slot.id == id)
            .map(|slot| slot.action.as_ref())
    }

    /// Concrete action of an agent, for inspection
    pub fn action_as<T: Action + 'static>(&self, id: &AgentId) -> Option<&T> {
        self.action(id).and_then(|a| a.as_any().downcast_ref::<T>())
    }

    pub fn agent_state(&self, id: &AgentId) -> Option<ActionState> {
        self.action(id).map(|a| a.state())
    }

    /// Reset one agent's action, e.g. to cancel a negotiation in flight
    pub fn reset_agent(&mut self, id: &AgentId) -> Result<(), WorldError> {
        let slot = self
            .agents
            .iter_mut()
            .find(|slot| &slot.id == id)
            .ok_or_else(|| WorldError::UnknownAgent(id.clone()))?;
        slot.action.reset();
        Ok(())
    }

    pub fn post_office(&self) -> &PostOffice {
        &self.post
    }

    /// Inject a message from outside the agent population
    pub fn deliver(&mut self, message: Message) -> Result<usize, WorldError> {
        Ok(self.post.deliver(message, self.tick)?)
    }

    /// Advance one tick and run every agent once
    pub fn step(&mut self) -> Result<Tick, WorldError> {
        self.tick += 1;
        let tick = self.tick;
        record_tick(tick);

        for slot in self.agents.iter_mut() {
            let mut ctx = TickContext {
                agent: &slot.id,
                tick,
                roster: &self.roster,
                post: &mut self.post,
                rng: &mut self.rng,
            };
            let action = &mut slot.action;

            let state = action.state();
            if state == ActionState::Failed {
                continue;
            }
            if state.is_terminal() || state == ActionState::PreconditionsFailed {
                if !self.restart_finished {
                    continue;
                }
                action.reset();
            }

            let wrap = |source| WorldError::Action {
                agent: slot.id.clone(),
                tick,
                source,
            };
            if action.state() == ActionState::Initial {
                action.check_preconditions(&ctx).map_err(wrap)?;
            }
            action.apply(&mut ctx).map_err(wrap)?;
        }

        Ok(tick)
    }

    pub fn run(&mut self, ticks: u64) -> Result<Tick, WorldError> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(self.tick)
    }

    /// Step until `done` holds or `max_ticks` more ticks have run
    pub fn run_until<F>(&mut self, max_ticks: u64, mut done: F) -> Result<Tick, WorldError>
    where
        F: FnMut(&World) -> bool,
    {
        for _ in 0..max_ticks {
            if done(self) {
                break;
            }
            self.step()?;
        }
        Ok(self.tick)
    }
}

/// Single-agent context with an inbox and a capture of sent messages
#[derive(Debug)]
pub struct LocalContext {
    agent: AgentId,
    tick: Tick,
    peers: Vec<AgentId>,
    inbox: Mailbox,
    sent: Vec<Message>,
    rng: StdRng,
}

impl LocalContext {
    pub fn new(agent: impl Into<String>, tick: Tick) -> Self {
        Self {
            agent: AgentId::new(agent),
            tick,
            peers: Vec::new(),
            inbox: Mailbox::new(),
            sent: Vec::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers = peers.into_iter().map(AgentId::new).collect();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    pub fn advance(&mut self) -> Tick {
        self.tick += 1;
        self.tick
    }

    pub fn deliver(&mut self, message: Message) {
        self.inbox.push(message);
    }

    pub fn inbox(&self) -> &Mailbox {
        &self.inbox
    }

    pub fn sent(&self) -> &[Message] {
        &self.sent
    }

    /// Drain the captured outbound messages
    pub fn take_sent(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.sent)
    }
}

impl AgentContext for LocalContext {
    fn agent_id(&self) -> &AgentId {
        &self.agent
    }

    fn current_tick(&self) -> Tick {
        self.tick
    }

    fn peers(&self) -> Vec<AgentId> {
        self.peers.clone()
    }

    fn has_message(&self, template: &MessageTemplate) -> bool {
        self.inbox.contains(template)
    }

    fn pull_messages(&mut self, template: &MessageTemplate) -> Vec<Message> {
        self.inbox.pull(template)
    }

    fn send_message(&mut self, message: Message) -> Result<(), DeliveryError> {
        if message.receivers().is_empty() {
            return Err(DeliveryError::NoRecipients {
                message: message.id().to_string(),
                sender: message.sender().clone(),
            });
        }
        self.sent.push(message);
        Ok(())
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}
