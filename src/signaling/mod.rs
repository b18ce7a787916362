//! Wire protocol shared by the relay server and room clients.
//!
//! Every frame on the signaling socket is one JSON-encoded [`SignalEvent`].
//! The event names and payload field names are part of the protocol and must
//! not change: any client and relay that agree on them interoperate.

mod client;

pub use client::SignalingClient;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// One member of a room as the relay reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

/// Signaling events, both directions, as they appear on the wire.
///
/// Offer/answer/candidate payloads are relayed untouched: the relay only
/// reads `toId` to pick the destination socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SignalEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_name: String,
        user_id: String,
        nickname: String,
    },
    RoomUsers(Vec<Participant>),
    UserJoined {
        id: String,
        nickname: String,
    },
    UserLeft(String),
    #[serde(rename_all = "camelCase")]
    Offer {
        description: RTCSessionDescription,
        from_id: String,
        to_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        description: RTCSessionDescription,
        from_id: String,
        to_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Ice {
        candidate: RTCIceCandidateInit,
        from_id: String,
        to_id: String,
    },
}

impl SignalEvent {
    /// Destination participant for relayed envelopes, `None` for everything
    /// the relay handles itself.
    pub fn relay_target(&self) -> Option<&str> {
        match self {
            SignalEvent::Offer { to_id, .. }
            | SignalEvent::Answer { to_id, .. }
            | SignalEvent::Ice { to_id, .. } => Some(to_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn join_room_wire_shape() {
        let event = SignalEvent::JoinRoom {
            room_name: "r1".into(),
            user_id: "u-1".into(),
            nickname: "Alice".into(),
        };
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "join_room");
        assert_eq!(value["data"]["roomName"], "r1");
        assert_eq!(value["data"]["userId"], "u-1");
        assert_eq!(value["data"]["nickname"], "Alice");
    }

    #[test]
    fn user_left_carries_only_the_id() {
        let value = serde_json::to_value(SignalEvent::UserLeft("u-9".into())).unwrap();
        assert_eq!(value, json!({ "event": "user_left", "data": "u-9" }));
    }

    #[test]
    fn roster_roundtrip_keeps_join_timestamps() {
        let event = SignalEvent::RoomUsers(vec![Participant {
            id: "u-1".into(),
            nickname: "Alice".into(),
            joined_at: Some("2026-02-10T09:30:00.123Z".parse().unwrap()),
        }]);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"joinedAt\""));
        let back: SignalEvent = serde_json::from_str(&json).unwrap();
        match back {
            SignalEvent::RoomUsers(users) => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].nickname, "Alice");
                assert!(users[0].joined_at.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ice_envelope_names_both_endpoints() {
        let event = SignalEvent::Ice {
            candidate: RTCIceCandidateInit {
                candidate: "candidate:1 1 udp 2130706431 192.0.2.7 50000 typ host".into(),
                ..Default::default()
            },
            from_id: "a".into(),
            to_id: "b".into(),
        };
        assert_eq!(event.relay_target(), Some("b"));
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "ice");
        assert_eq!(value["data"]["fromId"], "a");
        assert_eq!(value["data"]["toId"], "b");
    }

    #[test]
    fn offer_description_survives_relay_deserialization() {
        // What a browser-style peer would put on the wire.
        let frame = json!({
            "event": "offer",
            "data": {
                "description": { "type": "offer", "sdp": "v=0\r\n" },
                "fromId": "a",
                "toId": "b"
            }
        });
        let event: SignalEvent = serde_json::from_value(frame).unwrap();
        match event {
            SignalEvent::Offer { description, from_id, to_id } => {
                assert_eq!(from_id, "a");
                assert_eq!(to_id, "b");
                assert_eq!(description.sdp, "v=0\r\n");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
