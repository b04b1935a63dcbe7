// message.rs
// Core ACL message structures exchanged between simulated agents

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discrete simulation step
pub type Tick = u64;

/// Agent identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct AgentId(String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Correlation identifier, assigned once when a message is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Conversation identifier shared by a request and every reply in its thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ConversationId(uuid::Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

/// FIPA performatives used by the negotiation protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Performative {
    #[display("cfp")]
    Cfp,
    #[display("propose")]
    Propose,
    #[display("refuse")]
    Refuse,
    #[display("accept-proposal")]
    AcceptProposal,
    #[display("reject-proposal")]
    RejectProposal,
    #[display("inform")]
    Inform,
    #[display("failure")]
    Failure,
    #[display("not-understood")]
    NotUnderstood,
}

impl Performative {
    pub fn as_str(&self) -> &'static str {
        match self {
            Performative::Cfp => "cfp",
            Performative::Propose => "propose",
            Performative::Refuse => "refuse",
            Performative::AcceptProposal => "accept-proposal",
            Performative::RejectProposal => "reject-proposal",
            Performative::Inform => "inform",
            Performative::Failure => "failure",
            Performative::NotUnderstood => "not-understood",
        }
    }
}

/// Immutable ACL message.
///
/// Fields are private: a message is assembled with the `with_*` builders and
/// never changes once it has been handed to [`crate::context::AgentContext::send_message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    performative: Performative,
    sender: AgentId,
    receivers: Vec<AgentId>,
    topic: String,
    conversation_id: ConversationId,
    in_reply_to: Option<MessageId>,
    payload: Value,
}

impl Message {
    pub fn new(performative: Performative, sender: AgentId) -> Self {
        Self {
            id: MessageId::new(),
            performative,
            sender,
            receivers: Vec::new(),
            topic: String::new(),
            conversation_id: ConversationId::new(),
            in_reply_to: None,
            payload: Value::Null,
        }
    }

    pub fn with_receiver(mut self, receiver: AgentId) -> Self {
        if !self.receivers.contains(&receiver) {
            self.receivers.push(receiver);
        }
        self
    }

    pub fn with_receivers(mut self, receivers: impl IntoIterator<Item = AgentId>) -> Self {
        for receiver in receivers {
            self = self.with_receiver(receiver);
        }
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Build a reply addressed to this message's sender.
    ///
    /// The reply gets a fresh correlation id, echoes this message's id in
    /// `in_reply_to` and stays in the same conversation and topic.
    pub fn reply(&self, from: AgentId, performative: Performative, payload: Value) -> Message {
        Message {
            id: MessageId::new(),
            performative,
            sender: from,
            receivers: vec![self.sender.clone()],
            topic: self.topic.clone(),
            conversation_id: self.conversation_id,
            in_reply_to: Some(self.id),
            payload,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn performative(&self) -> Performative {
        self.performative
    }

    pub fn sender(&self) -> &AgentId {
        &self.sender
    }

    pub fn receivers(&self) -> &[AgentId] {
        &self.receivers
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn in_reply_to(&self) -> Option<MessageId> {
        self.in_reply_to
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Decode the payload into an application type
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn matches(&self, template: &crate::template::MessageTemplate) -> bool {
        template.matches(self)
    }
}
