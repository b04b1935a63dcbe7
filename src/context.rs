// context.rs - Agent-facing view of the simulation for one tick

use crate::message::{AgentId, Message, Tick};
use crate::template::MessageTemplate;
use rand::RngCore;

/// Delivery errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("message {message} from {sender} has no recipients")]
    NoRecipients { message: String, sender: AgentId },
}

/// What an action sees of the world while it runs.
///
/// The tick loop hands one of these to each action it drives. Retrieval is a
/// non-blocking pull of whatever has already been delivered to the agent.
pub trait AgentContext {
    /// Agent owning the running action
    fn agent_id(&self) -> &AgentId;

    fn current_tick(&self) -> Tick;

    /// Other agents this agent can address, in a stable order
    fn peers(&self) -> Vec<AgentId>;

    /// Whether a matching message is waiting, without consuming it
    fn has_message(&self, template: &MessageTemplate) -> bool;

    /// Drain matching messages in delivery order; non-matching ones stay queued
    fn pull_messages(&mut self, template: &MessageTemplate) -> Vec<Message>;

    fn send_message(&mut self, message: Message) -> Result<(), DeliveryError>;

    fn rng(&mut self) -> &mut dyn RngCore;
}
