use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::channel::{ChannelEnvelope, ChatMessage};
use crate::media::playback::{self, PlaybackHandle};
use crate::signaling::Participant;

/// Application state of the current room: who is here, what they said, what
/// their editors hold, and which remote tracks have arrived.
///
/// Chat is an append-only list in receipt order (per-channel FIFO, no global
/// order across peers). Editor buffers are last-write-wins per sender id;
/// that is safe because each sender only ever writes its own key.
pub struct RoomState {
    roster: Mutex<HashMap<String, Participant>>,
    chat: Mutex<Vec<ChatMessage>>,
    editors: Mutex<HashMap<String, String>>,
    local_editor: Mutex<String>,
    remote_tracks: Mutex<HashMap<String, Vec<Arc<TrackRemote>>>>,
    sinks: Mutex<HashSet<String>>,
    playing: Mutex<HashMap<String, PlaybackHandle>>,
}

impl RoomState {
    pub fn new() -> Self {
        Self {
            roster: Mutex::new(HashMap::new()),
            chat: Mutex::new(Vec::new()),
            editors: Mutex::new(HashMap::new()),
            local_editor: Mutex::new(String::new()),
            remote_tracks: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashSet::new()),
            playing: Mutex::new(HashMap::new()),
        }
    }

    pub async fn upsert_participant(&self, participant: Participant) {
        self.roster
            .lock()
            .await
            .insert(participant.id.clone(), participant);
    }

    pub async fn participants(&self) -> Vec<Participant> {
        self.roster.lock().await.values().cloned().collect()
    }

    pub async fn push_chat(&self, message: ChatMessage) {
        info!(from = %message.user_id, "chat: {}", message.message);
        self.chat.lock().await.push(message);
    }

    pub async fn chat_log(&self) -> Vec<ChatMessage> {
        self.chat.lock().await.clone()
    }

    pub async fn set_local_editor(&self, content: &str) {
        *self.local_editor.lock().await = content.to_owned();
    }

    pub async fn local_editor(&self) -> String {
        self.local_editor.lock().await.clone()
    }

    pub async fn set_remote_editor(&self, user_id: &str, content: String) {
        self.editors.lock().await.insert(user_id.to_owned(), content);
    }

    pub async fn remote_editor(&self, user_id: &str) -> Option<String> {
        self.editors.lock().await.get(user_id).cloned()
    }

    /// Applies one inbound data-channel envelope.
    pub async fn apply(&self, envelope: ChannelEnvelope) {
        match envelope {
            ChannelEnvelope::Chat(message) => self.push_chat(message).await,
            ChannelEnvelope::Editor(sync) => {
                self.set_remote_editor(&sync.user_id, sync.content).await
            }
        }
    }

    pub async fn add_remote_track(&self, peer_id: &str, track: Arc<TrackRemote>) {
        self.remote_tracks
            .lock()
            .await
            .entry(peer_id.to_owned())
            .or_default()
            .push(track);
        self.maybe_attach(peer_id).await;
    }

    pub async fn remote_track_count(&self, peer_id: &str) -> usize {
        self.remote_tracks
            .lock()
            .await
            .get(peer_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Requests audio playback for a participant. Attachment happens when
    /// both the request and an audio track exist, and exactly once.
    pub async fn attach_playback(&self, peer_id: &str) {
        self.sinks.lock().await.insert(peer_id.to_owned());
        self.maybe_attach(peer_id).await;
    }

    async fn maybe_attach(&self, peer_id: &str) {
        if !self.sinks.lock().await.contains(peer_id) {
            return;
        }
        if self.playing.lock().await.contains_key(peer_id) {
            return;
        }
        let audio_track = self
            .remote_tracks
            .lock()
            .await
            .get(peer_id)
            .and_then(|tracks| {
                tracks
                    .iter()
                    .find(|t| t.kind() == RTPCodecType::Audio)
                    .cloned()
            });
        let Some(track) = audio_track else { return };
        match playback::spawn(track) {
            Ok(handle) => {
                self.playing.lock().await.insert(peer_id.to_owned(), handle);
                debug!(peer = %peer_id, "audio playback attached");
            }
            Err(e) => warn!(peer = %peer_id, error = %e, "audio playback unavailable"),
        }
    }

    /// Forgets everything held for one participant.
    pub async fn drop_peer(&self, peer_id: &str) {
        self.roster.lock().await.remove(peer_id);
        self.editors.lock().await.remove(peer_id);
        self.remote_tracks.lock().await.remove(peer_id);
        self.sinks.lock().await.remove(peer_id);
        self.playing.lock().await.remove(peer_id);
    }

    /// Clears all room-scoped state on leave. The chat log survives so a
    /// transcript can still be read after the lesson ends.
    pub async fn reset(&self) {
        self.roster.lock().await.clear();
        self.editors.lock().await.clear();
        self.remote_tracks.lock().await.clear();
        self.sinks.lock().await.clear();
        self.playing.lock().await.clear();
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EditorSync;

    #[tokio::test]
    async fn chat_appends_in_receipt_order() {
        let state = RoomState::new();
        state.push_chat(ChatMessage::now("a", "first")).await;
        state.push_chat(ChatMessage::now("b", "second")).await;
        state.push_chat(ChatMessage::now("a", "third")).await;

        let log = state.chat_log().await;
        let lines: Vec<&str> = log.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(lines, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn editor_is_last_write_wins_per_sender() {
        let state = RoomState::new();
        state
            .apply(ChannelEnvelope::Editor(EditorSync {
                user_id: "a".into(),
                content: "v1".into(),
            }))
            .await;
        state
            .apply(ChannelEnvelope::Editor(EditorSync {
                user_id: "b".into(),
                content: "other".into(),
            }))
            .await;
        state
            .apply(ChannelEnvelope::Editor(EditorSync {
                user_id: "a".into(),
                content: "v2".into(),
            }))
            .await;

        assert_eq!(state.remote_editor("a").await.as_deref(), Some("v2"));
        assert_eq!(state.remote_editor("b").await.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn drop_peer_forgets_everything_but_chat() {
        let state = RoomState::new();
        state
            .upsert_participant(Participant {
                id: "a".into(),
                nickname: "Alice".into(),
                joined_at: None,
            })
            .await;
        state.set_remote_editor("a", "buffer".into()).await;
        state.push_chat(ChatMessage::now("a", "hello")).await;

        state.drop_peer("a").await;
        assert!(state.participants().await.is_empty());
        assert!(state.remote_editor("a").await.is_none());
        assert_eq!(state.remote_track_count("a").await, 0);
        // Chat history is a transcript, not per-peer cache.
        assert_eq!(state.chat_log().await.len(), 1);
    }
}
