// template.rs - Composable message predicates
//
//! Message templates select messages out of an agent's mailbox.
//!
//! A template is a pure predicate over [`Message`]. The leaf templates test a
//! single attribute (performative, topic, conversation, reply correlation); the combinators
//! build new templates without touching their inputs.
//!
//! ```ignore
//! let replies = MessageTemplate::is_reply_to(&cfp)
//!     .and(MessageTemplate::performative(Performative::Propose));
//! let proposals = ctx.pull_messages(&replies);
//! ```

use crate::message::{ConversationId, Message, MessageId, Performative};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTemplate {
    /// Matches every message
    Any,
    /// Matches nothing
    AlwaysFalse,
    Performative(Performative),
    Topic(String),
    Conversation(ConversationId),
    /// Matches replies whose `in_reply_to` is one of the given ids
    ReplyTo(HashSet<MessageId>),
    And(Vec<MessageTemplate>),
    Or(Vec<MessageTemplate>),
    Not(Box<MessageTemplate>),
}

impl MessageTemplate {
    pub fn any() -> Self {
        MessageTemplate::Any
    }

    pub fn always_false() -> Self {
        MessageTemplate::AlwaysFalse
    }

    pub fn performative(performative: Performative) -> Self {
        MessageTemplate::Performative(performative)
    }

    pub fn topic(topic: impl Into<String>) -> Self {
        MessageTemplate::Topic(topic.into())
    }

    pub fn conversation(conversation_id: ConversationId) -> Self {
        MessageTemplate::Conversation(conversation_id)
    }

    pub fn is_reply_to(original: &Message) -> Self {
        MessageTemplate::ReplyTo(HashSet::from([original.id()]))
    }

    /// Replies to any of the given messages. An empty set matches nothing.
    pub fn is_reply_to_any<'a>(originals: impl IntoIterator<Item = &'a Message>) -> Self {
        Self::reply_to_ids(originals.into_iter().map(Message::id))
    }

    pub fn reply_to_ids(ids: impl IntoIterator<Item = MessageId>) -> Self {
        let ids: HashSet<MessageId> = ids.into_iter().collect();
        if ids.is_empty() {
            MessageTemplate::AlwaysFalse
        } else {
            MessageTemplate::ReplyTo(ids)
        }
    }

    pub fn and(self, other: MessageTemplate) -> Self {
        match self {
            MessageTemplate::And(mut parts) => {
                parts.push(other);
                MessageTemplate::And(parts)
            }
            first => MessageTemplate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: MessageTemplate) -> Self {
        match self {
            MessageTemplate::Or(mut parts) => {
                parts.push(other);
                MessageTemplate::Or(parts)
            }
            first => MessageTemplate::Or(vec![first, other]),
        }
    }

    pub fn all_of(parts: impl IntoIterator<Item = MessageTemplate>) -> Self {
        MessageTemplate::And(parts.into_iter().collect())
    }

    pub fn any_of(parts: impl IntoIterator<Item = MessageTemplate>) -> Self {
        MessageTemplate::Or(parts.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        MessageTemplate::Not(Box::new(self))
    }

    /// Evaluate the predicate. An empty `And` is true, an empty `Or` is false.
    pub fn matches(&self, msg: &Message) -> bool {
        match self {
            MessageTemplate::Any => true,
            MessageTemplate::AlwaysFalse => false,
            MessageTemplate::Performative(p) => msg.performative() == *p,
            MessageTemplate::Topic(t) => msg.topic() == t,
            MessageTemplate::Conversation(c) => msg.conversation_id() == *c,
            MessageTemplate::ReplyTo(ids) => msg
                .in_reply_to()
                .map(|id| ids.contains(&id))
                .unwrap_or(false),
            MessageTemplate::And(parts) => parts.iter().all(|t| t.matches(msg)),
            MessageTemplate::Or(parts) => parts.iter().any(|t| t.matches(msg)),
            MessageTemplate::Not(inner) => !inner.matches(msg),
        }
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        MessageTemplate::AlwaysFalse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AgentId;
    use serde_json::Value;

    fn cfp() -> Message {
        Message::new(Performative::Cfp, AgentId::new("buyer"))
            .with_receiver(AgentId::new("seller"))
            .with_topic("trade")
    }

    #[test]
    fn test_leaf_templates() {
        let msg = cfp();
        assert!(MessageTemplate::performative(Performative::Cfp).matches(&msg));
        assert!(!MessageTemplate::performative(Performative::Propose).matches(&msg));
        assert!(MessageTemplate::topic("trade").matches(&msg));
        assert!(!MessageTemplate::topic("mating").matches(&msg));
        assert!(!MessageTemplate::always_false().matches(&msg));
        assert!(MessageTemplate::any().matches(&msg));

        let reply = msg.reply(AgentId::new("seller"), Performative::Refuse, Value::Null);
        assert!(MessageTemplate::conversation(msg.conversation_id()).matches(&reply));
        assert!(!MessageTemplate::conversation(cfp().conversation_id()).matches(&reply));
    }

    #[test]
    fn test_reply_to() {
        let request = cfp();
        let other = cfp();
        let reply = request.reply(AgentId::new("seller"), Performative::Propose, Value::Null);

        assert!(MessageTemplate::is_reply_to(&request).matches(&reply));
        assert!(reply.matches(&MessageTemplate::is_reply_to(&request)));
        assert!(!MessageTemplate::is_reply_to(&other).matches(&reply));
        assert!(!MessageTemplate::is_reply_to(&request).matches(&request));
        assert!(MessageTemplate::is_reply_to_any([&other, &request]).matches(&reply));
        assert_eq!(
            MessageTemplate::is_reply_to_any(std::iter::empty()),
            MessageTemplate::AlwaysFalse
        );
    }

    #[test]
    fn test_combinators() {
        let msg = cfp();
        let cfp_on_trade = MessageTemplate::performative(Performative::Cfp)
            .and(MessageTemplate::topic("trade"));
        assert!(cfp_on_trade.matches(&msg));

        let cfp_on_mating = MessageTemplate::performative(Performative::Cfp)
            .and(MessageTemplate::topic("mating"));
        assert!(!cfp_on_mating.matches(&msg));
        assert!(cfp_on_mating.clone().or(cfp_on_trade.clone()).matches(&msg));
        assert!(!cfp_on_trade.not().matches(&msg));

        assert!(MessageTemplate::all_of([]).matches(&msg));
        assert!(!MessageTemplate::any_of([]).matches(&msg));
    }

    #[test]
    fn test_and_flattens() {
        let t = MessageTemplate::any()
            .and(MessageTemplate::topic("a"))
            .and(MessageTemplate::topic("b"));
        match t {
            MessageTemplate::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected template {:?}", other),
        }
    }
}
