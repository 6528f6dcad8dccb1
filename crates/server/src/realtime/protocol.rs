//! Wire format for the realtime socket.
//!
//! Every frame is a JSON text frame `{"event": <name>, "data": <payload>}`
//! in both directions, with camelCase payload fields.

use crate::core::models::{ConversationId, Message, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

/// Inbound events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "conversation:join")]
    JoinConversation(ConversationRef),
    #[serde(rename = "conversation:leave")]
    LeaveConversation(ConversationRef),
    #[serde(rename = "typing:start")]
    TypingStart(ConversationRef),
    #[serde(rename = "typing:stop")]
    TypingStop(ConversationRef),
}

impl ClientEvent {
    /// Parse a text frame. Unknown event names and malformed payloads yield
    /// `None` so newer clients never break the connection.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            ClientEvent::JoinConversation(r)
            | ClientEvent::LeaveConversation(r)
            | ClientEvent::TypingStart(r)
            | ClientEvent::TypingStop(r) => &r.conversation_id,
        }
    }
}

/// Outbound events pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "user:online")]
    UserOnline { user_id: UserId },
    #[serde(rename = "user:offline")]
    UserOffline {
        user_id: UserId,
        last_active: DateTime<Utc>,
    },
    #[serde(rename = "typing")]
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "message:read")]
    MessageRead {
        message_id: String,
        conversation_id: ConversationId,
        user_id: UserId,
    },
    #[serde(rename = "conversation:read")]
    ConversationRead {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    #[serde(rename = "message:deleted")]
    MessageDeleted {
        message_id: String,
        conversation_id: ConversationId,
    },
}

/// A serialized outbound frame. Encoded once per broadcast and shared by
/// every recipient queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    text: Arc<str>,
}

impl OutboundFrame {
    /// Build a frame from an arbitrary event name and payload.
    pub fn new(event: &str, data: Value) -> Self {
        let envelope = serde_json::json!({ "event": event, "data": data });
        Self {
            text: Arc::from(envelope.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Decode back into a JSON value; handy for clients and tests.
    pub fn to_value(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }

    pub fn event_name(&self) -> Option<String> {
        self.to_value()
            .get("event")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl TryFrom<&ServerEvent> for OutboundFrame {
    type Error = serde_json::Error;

    fn try_from(event: &ServerEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            text: Arc::from(serde_json::to_string(event)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join() {
        let ev = ClientEvent::parse(r#"{"event":"conversation:join","data":{"conversationId":"c1"}}"#)
            .unwrap();
        assert_eq!(
            ev,
            ClientEvent::JoinConversation(ConversationRef {
                conversation_id: "c1".into()
            })
        );
        assert_eq!(ev.conversation_id(), "c1");
    }

    #[test]
    fn test_unknown_and_malformed_are_ignored() {
        assert!(ClientEvent::parse(r#"{"event":"call:start","data":{}}"#).is_none());
        assert!(ClientEvent::parse(r#"{"event":"typing:start","data":{"room":"c1"}}"#).is_none());
        assert!(ClientEvent::parse("not json").is_none());
    }

    #[test]
    fn test_server_event_envelope() {
        let frame = OutboundFrame::try_from(&ServerEvent::Typing {
            conversation_id: "c1".into(),
            user_id: "alice".into(),
            is_typing: true,
        })
        .unwrap();
        assert_eq!(
            frame.to_value(),
            json!({
                "event": "typing",
                "data": {"conversationId": "c1", "userId": "alice", "isTyping": true}
            })
        );
        assert_eq!(frame.event_name().as_deref(), Some("typing"));
    }

    #[test]
    fn test_offline_carries_last_active() {
        let frame = OutboundFrame::try_from(&ServerEvent::UserOffline {
            user_id: "bob".into(),
            last_active: Utc::now(),
        })
        .unwrap();
        let value = frame.to_value();
        assert_eq!(value["event"], "user:offline");
        assert!(value["data"]["lastActive"].is_string());
    }

    #[test]
    fn test_raw_frame() {
        let frame = OutboundFrame::new("custom:event", json!({"a": 1}));
        assert_eq!(frame.to_value()["data"]["a"], 1);
    }
}
