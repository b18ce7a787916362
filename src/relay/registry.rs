use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::signaling::Participant;

/// Outbound half of one connected client.
pub type PeerSender = mpsc::UnboundedSender<Message>;

struct PeerEntry {
    nickname: String,
    joined_at: DateTime<Utc>,
    room: String,
    tx: PeerSender,
}

/// In-memory room membership. Rooms exist exactly while they have members;
/// participant ids are process-lifetime unique, so envelope routing uses a
/// flat id index with no room scoping.
#[derive(Default)]
pub struct RoomRegistry {
    peers: HashMap<String, PeerEntry>,
    rooms: HashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    /// Registers a participant, creating the room on first use. Returns the
    /// roster as it was before this join, excluding the joiner.
    pub fn join(
        &mut self,
        room: &str,
        user_id: &str,
        nickname: &str,
        tx: PeerSender,
    ) -> Vec<Participant> {
        let roster = self
            .rooms
            .get(room)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| {
                        self.peers.get(id).map(|entry| Participant {
                            id: id.clone(),
                            nickname: entry.nickname.clone(),
                            joined_at: Some(entry.joined_at),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.rooms
            .entry(room.to_owned())
            .or_default()
            .insert(user_id.to_owned());
        self.peers.insert(
            user_id.to_owned(),
            PeerEntry {
                nickname: nickname.to_owned(),
                joined_at: Utc::now(),
                room: room.to_owned(),
                tx,
            },
        );
        roster
    }

    /// Live transport for a participant id, wherever it is.
    pub fn sender_for(&self, user_id: &str) -> Option<PeerSender> {
        self.peers.get(user_id).map(|entry| entry.tx.clone())
    }

    /// Everyone sharing a room with `user_id`, excluding `user_id` itself.
    pub fn roommates(&self, user_id: &str) -> Vec<PeerSender> {
        let Some(entry) = self.peers.get(user_id) else {
            return Vec::new();
        };
        self.rooms
            .get(&entry.room)
            .map(|ids| {
                ids.iter()
                    .filter(|id| id.as_str() != user_id)
                    .filter_map(|id| self.peers.get(id).map(|e| e.tx.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops a participant and returns the remaining members of its room.
    /// The room itself disappears when the last member leaves.
    pub fn remove(&mut self, user_id: &str) -> Vec<PeerSender> {
        let Some(entry) = self.peers.remove(user_id) else {
            return Vec::new();
        };
        let mut remaining = Vec::new();
        if let Some(ids) = self.rooms.get_mut(&entry.room) {
            ids.remove(user_id);
            if ids.is_empty() {
                self.rooms.remove(&entry.room);
            } else {
                remaining = ids
                    .iter()
                    .filter_map(|id| self.peers.get(id).map(|e| e.tx.clone()))
                    .collect();
            }
        }
        remaining
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(HashSet::len).unwrap_or(0)
    }
}
