//! Typed messages carried over each link's "chat" data channel.
//!
//! Envelopes are JSON with a `type`/`data` layout. Each sender owns its own
//! key in the editor map, so editor updates are last-write-wins per sender
//! with no conflict resolution; chat lines are appended in receipt order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const CHAT_CHANNEL_LABEL: &str = "chat";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ChannelEnvelope {
    Chat(ChatMessage),
    Editor(EditorSync),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message: String,
    pub user_id: String,
    /// Serialized as an ISO-8601 string; reconstructed on receipt.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn now(user_id: &str, message: &str) -> Self {
        Self {
            message: message.to_owned(),
            user_id: user_id.to_owned(),
            timestamp: Utc::now(),
        }
    }
}

/// Full snapshot of one participant's editor buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorSync {
    pub user_id: String,
    pub content: String,
}

impl ChannelEnvelope {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn chat_timestamp_roundtrips_to_the_millisecond() {
        let sent = ChannelEnvelope::Chat(ChatMessage {
            message: "hello".into(),
            user_id: "u-1".into(),
            timestamp: "2026-03-01T14:05:09.250Z".parse().unwrap(),
        });
        let json = sent.encode().unwrap();
        let received = ChannelEnvelope::decode(&json).unwrap();
        match (sent, received) {
            (ChannelEnvelope::Chat(a), ChannelEnvelope::Chat(b)) => {
                assert_eq!(a.timestamp.timestamp_millis(), b.timestamp.timestamp_millis());
                assert_eq!(a, b);
            }
            _ => panic!("envelope kind changed in transit"),
        }
    }

    #[test]
    fn envelope_wire_shape() {
        let envelope = ChannelEnvelope::Chat(ChatMessage::now("u-1", "hi"));
        let value: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["data"]["userId"], "u-1");
        assert_eq!(value["data"]["message"], "hi");
        assert!(value["data"]["timestamp"].is_string());
    }

    #[test]
    fn editor_sync_keys_by_sender() {
        let envelope = ChannelEnvelope::Editor(EditorSync {
            user_id: "u-2".into(),
            content: "print('hi')".into(),
        });
        let value: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "editor");
        assert_eq!(value["data"]["userId"], "u-2");
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        assert!(ChannelEnvelope::decode("{\"type\":\"chat\"").is_err());
        assert!(ChannelEnvelope::decode("{\"type\":\"poke\",\"data\":{}}").is_err());
    }
}
