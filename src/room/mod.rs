//! Room membership: the join/leave lifecycle and the dispatch of inbound
//! signaling events into peer-link operations.

pub mod state;

pub use state::RoomState;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channel::{ChannelEnvelope, ChatMessage, EditorSync};
use crate::error::{Error, Result};
use crate::media::LocalMedia;
use crate::peer::PeerManager;
use crate::signaling::{Participant, SignalEvent, SignalingClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Idle,
    Joining,
    InRoom,
    Leaving,
}

/// One client's presence in one room.
///
/// Role assignment is asymmetric and decided purely by join order: whoever
/// was already in the room initiates toward the newcomer. On the roster
/// this client waits to be offered to by each existing member; on every
/// later join notice this client offers first. That rule is fixed here,
/// once, and never re-derived downstream.
pub struct RoomSession {
    local_id: String,
    nickname: String,
    room_name: Option<String>,
    phase: RoomPhase,
    signal_tx: mpsc::Sender<SignalEvent>,
    signal_rx: mpsc::Receiver<SignalEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    manager: Arc<PeerManager>,
    media: Arc<LocalMedia>,
    state: Arc<RoomState>,
}

impl RoomSession {
    pub fn new(client: SignalingClient, media: Arc<LocalMedia>, state: Arc<RoomState>) -> Self {
        let (signal_tx, signal_rx, shutdown) = client.into_parts();
        let local_id = Uuid::new_v4().to_string();
        let manager = Arc::new(PeerManager::new(
            local_id.clone(),
            media.clone(),
            state.clone(),
            signal_tx.clone(),
        ));
        Self {
            local_id,
            nickname: String::new(),
            room_name: None,
            phase: RoomPhase::Idle,
            signal_tx,
            signal_rx,
            shutdown,
            manager,
            media,
            state,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn room_name(&self) -> Option<&str> {
        self.room_name.as_deref()
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn manager(&self) -> Arc<PeerManager> {
        self.manager.clone()
    }

    pub fn state(&self) -> Arc<RoomState> {
        self.state.clone()
    }

    /// Announces this client to the room. Media acquisition failure is
    /// non-fatal: the session continues without local tracks and every link
    /// becomes data-channel-only.
    pub async fn join(&mut self, room_name: &str, nickname: &str) -> Result<()> {
        if self.phase != RoomPhase::Idle {
            return Err(Error::AlreadyJoined);
        }

        // A rejoin is a brand-new participant: fresh id, fresh manager.
        self.local_id = Uuid::new_v4().to_string();
        self.manager = Arc::new(PeerManager::new(
            self.local_id.clone(),
            self.media.clone(),
            self.state.clone(),
            self.signal_tx.clone(),
        ));

        if let Err(e) = self.media.acquire().await {
            warn!(error = %e, "camera error, continuing without local media");
        }

        self.room_name = Some(room_name.to_owned());
        self.nickname = nickname.to_owned();
        self.phase = RoomPhase::Joining;

        self.signal_tx
            .send(SignalEvent::JoinRoom {
                room_name: room_name.to_owned(),
                user_id: self.local_id.clone(),
                nickname: nickname.to_owned(),
            })
            .await
            .map_err(|_| Error::SignalingClosed)
    }

    /// Next inbound signaling event, `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<SignalEvent> {
        self.signal_rx.recv().await
    }

    /// Runs the event loop until the signaling transport closes.
    pub async fn run(&mut self) {
        while let Some(event) = self.next_event().await {
            self.handle_event(event).await;
        }
    }

    /// Dispatches one inbound event. Failures are caught here or below and
    /// logged; nothing propagates out of the event loop, and a failure on
    /// one link never affects another.
    pub async fn handle_event(&mut self, event: SignalEvent) {
        match event {
            SignalEvent::RoomUsers(roster) => {
                if self.phase != RoomPhase::Joining {
                    debug!("roster outside join flow ignored");
                    return;
                }
                self.phase = RoomPhase::InRoom;
                for member in roster {
                    self.state.upsert_participant(member.clone()).await;
                    // Existing members initiate toward us; prepare the
                    // answering side of each link and wait for their offers.
                    match self.manager.create_link(&member.id, false).await {
                        Ok(_) => self.state.attach_playback(&member.id).await,
                        Err(e) => {
                            warn!(peer = %member.id, error = %e, "failed to prepare link for roster member")
                        }
                    }
                }
            }
            SignalEvent::UserJoined { id, nickname } => {
                if self.phase != RoomPhase::InRoom {
                    debug!(peer = %id, "join notice outside room ignored");
                    return;
                }
                self.state
                    .upsert_participant(Participant {
                        id: id.clone(),
                        nickname,
                        joined_at: None,
                    })
                    .await;
                // We were here first, so we offer toward the newcomer.
                self.offer_to(&id).await;
            }
            SignalEvent::Offer {
                description,
                from_id,
                to_id,
            } => {
                if to_id != self.local_id {
                    debug!(peer = %from_id, "misrouted offer ignored");
                    return;
                }
                let link = match self.manager.link(&from_id).await {
                    Some(link) => link,
                    None => match self.manager.create_link(&from_id, false).await {
                        Ok(link) => {
                            self.state.attach_playback(&from_id).await;
                            link
                        }
                        Err(e) => {
                            warn!(peer = %from_id, error = %e, "cannot build link for offer");
                            return;
                        }
                    },
                };
                match link.accept_offer(description).await {
                    Ok(answer) => {
                        let envelope = SignalEvent::Answer {
                            description: answer,
                            from_id: self.local_id.clone(),
                            to_id: from_id.clone(),
                        };
                        if self.signal_tx.send(envelope).await.is_err() {
                            debug!(peer = %from_id, "signaling gone, answer dropped");
                        }
                    }
                    Err(e) => warn!(peer = %from_id, error = %e, "failed to apply remote offer"),
                }
            }
            SignalEvent::Answer {
                description,
                from_id,
                to_id,
            } => {
                if to_id != self.local_id {
                    debug!(peer = %from_id, "misrouted answer ignored");
                    return;
                }
                match self.manager.link(&from_id).await {
                    Some(link) => {
                        if let Err(e) = link.accept_answer(description).await {
                            warn!(peer = %from_id, error = %e, "failed to apply remote answer");
                        }
                    }
                    None => debug!(peer = %from_id, "answer for absent link dropped"),
                }
            }
            SignalEvent::Ice {
                candidate,
                from_id,
                to_id,
            } => {
                if to_id != self.local_id {
                    debug!(peer = %from_id, "misrouted candidate ignored");
                    return;
                }
                match self.manager.link(&from_id).await {
                    Some(link) => {
                        if let Err(e) = link.add_remote_candidate(candidate).await {
                            warn!(peer = %from_id, error = %e, "remote candidate rejected");
                        }
                    }
                    None => debug!(peer = %from_id, "candidate for absent link dropped"),
                }
            }
            SignalEvent::UserLeft(id) => {
                self.manager.destroy_link(&id).await;
            }
            SignalEvent::JoinRoom { .. } => {
                debug!("server-bound event echoed back ignored");
            }
        }
    }

    async fn offer_to(&self, remote_id: &str) {
        let link = match self.manager.create_link(remote_id, true).await {
            Ok(link) => link,
            Err(e) => {
                warn!(peer = %remote_id, error = %e, "failed to build initiating link");
                return;
            }
        };
        // Headless clients have no per-peer video element; the speaker sink
        // stands in for it and attaches once remote audio arrives.
        self.state.attach_playback(remote_id).await;
        match link.start_offer().await {
            Ok(description) => {
                let envelope = SignalEvent::Offer {
                    description,
                    from_id: self.local_id.clone(),
                    to_id: remote_id.to_owned(),
                };
                if self.signal_tx.send(envelope).await.is_err() {
                    debug!(peer = %remote_id, "signaling gone, offer dropped");
                }
            }
            Err(e) => warn!(peer = %remote_id, error = %e, "offer creation failed"),
        }
    }

    /// Sends one chat line: appended locally exactly once, then broadcast.
    /// Nothing comes back over the wire for our own messages.
    pub async fn send_chat(&self, text: &str) {
        let message = ChatMessage::now(&self.local_id, text);
        self.state.push_chat(message.clone()).await;
        self.manager
            .broadcast(&ChannelEnvelope::Chat(message))
            .await;
    }

    /// Updates the local editor buffer and pushes the snapshot to peers.
    pub async fn set_editor(&self, content: &str) {
        self.state.set_local_editor(content).await;
        self.manager
            .broadcast(&ChannelEnvelope::Editor(EditorSync {
                user_id: self.local_id.clone(),
                content: content.to_owned(),
            }))
            .await;
    }

    /// Hot-swaps the camera and propagates the new track into every open
    /// link without renegotiation.
    pub async fn switch_camera(&self, device_id: &str) -> Result<()> {
        let track = self.media.switch_camera(device_id).await?;
        self.manager.replace_video_track(track).await;
        Ok(())
    }

    /// Leaves the room: every link is torn down and capture stopped before
    /// this returns; the relay sees the socket close as the leave signal.
    /// In-flight signaling for destroyed links is discarded on receipt.
    pub async fn leave(&mut self) {
        if self.phase == RoomPhase::Idle {
            return;
        }
        self.phase = RoomPhase::Leaving;
        self.manager.destroy_all().await;
        self.media.stop().await;
        self.state.reset().await;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.room_name = None;
        self.phase = RoomPhase::Idle;
    }
}
