// protocol/reply.rs - Typed reply builders
//
// Each protocol phase gets its own reply enum, so a strategy can only build
// the performatives that phase allows. Content errors raised while building a
// reply become a NOT-UNDERSTOOD message to the original sender.

use crate::message::{AgentId, Message, Performative};
use crate::observability::{record_not_understood, Role};
use serde_json::{json, Value};
use tracing::warn;

/// Payload problems found while answering a message
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("malformed content: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unacceptable content: {0}")]
    Invalid(String),
}

/// Phase-specific reply
pub trait ReplyKind {
    fn performative(&self) -> Performative;

    fn into_payload(self) -> Value;
}

/// Initiator's answer to a PROPOSE
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalReply {
    Accept(Value),
    Reject(Value),
}

/// Participant's answer to a CFP
#[derive(Debug, Clone, PartialEq)]
pub enum CfpReply {
    Propose(Value),
    Refuse(Value),
}

/// Participant's answer to an ACCEPT-PROPOSAL
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptReply {
    Inform(Value),
    Failure(Value),
}

impl ReplyKind for ProposalReply {
    fn performative(&self) -> Performative {
        match self {
            ProposalReply::Accept(_) => Performative::AcceptProposal,
            ProposalReply::Reject(_) => Performative::RejectProposal,
        }
    }

    fn into_payload(self) -> Value {
        match self {
            ProposalReply::Accept(v) | ProposalReply::Reject(v) => v,
        }
    }
}

impl ReplyKind for CfpReply {
    fn performative(&self) -> Performative {
        match self {
            CfpReply::Propose(_) => Performative::Propose,
            CfpReply::Refuse(_) => Performative::Refuse,
        }
    }

    fn into_payload(self) -> Value {
        match self {
            CfpReply::Propose(v) | CfpReply::Refuse(v) => v,
        }
    }
}

impl ReplyKind for AcceptReply {
    fn performative(&self) -> Performative {
        match self {
            AcceptReply::Inform(_) => Performative::Inform,
            AcceptReply::Failure(_) => Performative::Failure,
        }
    }

    fn into_payload(self) -> Value {
        match self {
            AcceptReply::Inform(v) | AcceptReply::Failure(v) => v,
        }
    }
}

/// A reply ready to send
#[derive(Debug, Clone)]
pub enum BuiltReply {
    Understood(Message),
    NotUnderstood(Message),
}

impl BuiltReply {
    pub fn message(&self) -> &Message {
        match self {
            BuiltReply::Understood(m) | BuiltReply::NotUnderstood(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            BuiltReply::Understood(m) | BuiltReply::NotUnderstood(m) => m,
        }
    }
}

/// Turn a strategy outcome into the reply message for `original`
pub fn build_reply<R: ReplyKind>(
    original: &Message,
    me: &AgentId,
    outcome: Result<R, ContentError>,
    role: Role,
) -> BuiltReply {
    match outcome {
        Ok(reply) => {
            let performative = reply.performative();
            BuiltReply::Understood(original.reply(me.clone(), performative, reply.into_payload()))
        }
        Err(err) => BuiltReply::NotUnderstood(not_understood(original, me, &err.to_string(), role)),
    }
}

/// NOT-UNDERSTOOD reply carrying the reason
pub fn not_understood(original: &Message, me: &AgentId, reason: &str, role: Role) -> Message {
    warn!(
        role = role.as_str(),
        sender = %original.sender(),
        performative = %original.performative(),
        reason,
        "Replying not-understood"
    );
    record_not_understood(role);
    original.reply(
        me.clone(),
        Performative::NotUnderstood,
        json!({ "error": reason }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn proposal() -> Message {
        Message::new(Performative::Propose, AgentId::new("seller"))
            .with_receiver(AgentId::new("buyer"))
            .with_topic("trade")
            .with_payload(json!({"price": "cheap"}))
    }

    #[test]
    fn test_understood_reply_correlates() {
        let original = proposal();
        let me = AgentId::new("buyer");
        let built = build_reply(&original, &me, Ok(ProposalReply::Accept(json!({"ok": true}))), Role::Initiator);

        let BuiltReply::Understood(reply) = built else {
            panic!("expected understood reply");
        };
        assert_eq!(reply.performative(), Performative::AcceptProposal);
        assert_eq!(reply.in_reply_to(), Some(original.id()));
        assert_eq!(reply.receivers(), &[AgentId::new("seller")]);
        assert_eq!(reply.payload(), &json!({"ok": true}));
    }

    #[test]
    fn test_malformed_content_becomes_not_understood() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Offer {
            price: u32,
        }

        let original = proposal();
        let me = AgentId::new("buyer");
        let outcome: Result<ProposalReply, ContentError> = original
            .decode::<Offer>()
            .map_err(ContentError::from)
            .map(|_| ProposalReply::Accept(Value::Null));

        let built = build_reply(&original, &me, outcome, Role::Initiator);
        assert!(matches!(built, BuiltReply::NotUnderstood(_)));
        let reply = built.into_message();
        assert_eq!(reply.performative(), Performative::NotUnderstood);
        assert_eq!(reply.in_reply_to(), Some(original.id()));
        assert!(reply.payload()["error"].as_str().unwrap().contains("malformed"));
    }

    #[test]
    fn test_phase_performatives() {
        assert_eq!(CfpReply::Refuse(Value::Null).performative(), Performative::Refuse);
        assert_eq!(CfpReply::Propose(Value::Null).performative(), Performative::Propose);
        assert_eq!(AcceptReply::Inform(Value::Null).performative(), Performative::Inform);
        assert_eq!(AcceptReply::Failure(Value::Null).performative(), Performative::Failure);
        assert_eq!(ProposalReply::Reject(Value::Null).performative(), Performative::RejectProposal);
    }
}
