use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::channel::{ChannelEnvelope, EditorSync, CHAT_CHANNEL_LABEL};
use crate::error::{Error, Result};
use crate::peer::monitor::{ConnectionMonitor, LinkStatus};
use crate::room::state::RoomState;
use crate::signaling::SignalEvent;

/// Public STUN endpoints used for every link. No TURN is configured, so
/// symmetric-NAT pairs will fail to connect; that is a documented limitation.
const STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// One remote participant's direct transport: the peer connection, the
/// optional "chat" data channel, and the candidates that arrived before the
/// remote description was applied.
pub struct PeerLink {
    remote_id: String,
    initiator: bool,
    pc: Arc<RTCPeerConnection>,
    channel: ChannelSlot,
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    remote_set: AtomicBool,
    monitor: ConnectionMonitor,
}

impl PeerLink {
    /// Builds the transport and wires every handler. The initiator side also
    /// creates the data channel; the receiver side waits for the remote one.
    pub(crate) async fn connect(
        local_id: &str,
        remote_id: &str,
        initiator: bool,
        signal_tx: mpsc::Sender<SignalEvent>,
        state: Arc<RoomState>,
        local_tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> Result<Arc<Self>> {
        let pc = new_peer_connection().await?;
        let monitor = ConnectionMonitor::new();

        {
            let tx = signal_tx.clone();
            let from = local_id.to_owned();
            let to = remote_id.to_owned();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                let from = from.clone();
                let to = to.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => {
                            let envelope = SignalEvent::Ice {
                                candidate: init,
                                from_id: from,
                                to_id: to.clone(),
                            };
                            if tx.send(envelope).await.is_err() {
                                debug!(peer = %to, "signaling gone, local candidate dropped");
                            }
                        }
                        Err(e) => warn!(peer = %to, error = %e, "local candidate serialization failed"),
                    }
                })
            }));
        }

        {
            let monitor = monitor.clone();
            let peer = remote_id.to_owned();
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                info!(peer = %peer, state = %s, "peer connection state changed");
                monitor.update_peer_state(s);
                Box::pin(async {})
            }));
        }

        {
            let state = state.clone();
            let peer = remote_id.to_owned();
            pc.on_track(Box::new(
                move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                    let state = state.clone();
                    let peer = peer.clone();
                    Box::pin(async move {
                        debug!(peer = %peer, kind = %track.kind(), "remote track received");
                        state.add_remote_track(&peer, track).await;
                    })
                },
            ));
        }

        // A link with zero local tracks is valid: the session stays
        // data-channel-only when capture was never acquired.
        for track in local_tracks {
            if let Err(e) = pc.add_track(track).await {
                warn!(peer = %remote_id, error = %e, "failed to attach local track");
            }
        }

        let channel: ChannelSlot = Arc::new(Mutex::new(None));
        if initiator {
            let dc = pc.create_data_channel(CHAT_CHANNEL_LABEL, None).await?;
            wire_channel(dc, channel.clone(), state.clone(), local_id, remote_id).await;
        } else {
            let slot = channel.clone();
            let state = state.clone();
            let local = local_id.to_owned();
            let peer = remote_id.to_owned();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let slot = slot.clone();
                let state = state.clone();
                let local = local.clone();
                let peer = peer.clone();
                Box::pin(async move {
                    wire_channel(dc, slot, state, &local, &peer).await;
                })
            }));
        }

        Ok(Arc::new(Self {
            remote_id: remote_id.to_owned(),
            initiator,
            pc,
            channel,
            pending_candidates: Mutex::new(Vec::new()),
            remote_set: AtomicBool::new(false),
            monitor,
        }))
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn status(&self) -> tokio::sync::watch::Receiver<LinkStatus> {
        self.monitor.subscribe()
    }

    pub async fn channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.channel.lock().await.clone()
    }

    /// Creates the local offer and stores it as the local description.
    pub async fn start_offer(&self) -> Result<RTCSessionDescription> {
        let offer = self.observe(self.pc.create_offer(None).await)?;
        self.observe(self.pc.set_local_description(offer.clone()).await)?;
        Ok(offer)
    }

    /// Applies a remote offer and produces the answer.
    pub async fn accept_offer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription> {
        self.observe(self.pc.set_remote_description(offer).await)?;
        self.mark_remote_ready().await;
        let answer = self.observe(self.pc.create_answer(None).await)?;
        self.observe(self.pc.set_local_description(answer.clone()).await)?;
        Ok(answer)
    }

    /// Applies the remote answer on the initiator side.
    pub async fn accept_answer(&self, answer: RTCSessionDescription) -> Result<()> {
        self.observe(self.pc.set_remote_description(answer).await)?;
        self.mark_remote_ready().await;
        Ok(())
    }

    /// Adds a remote candidate, queuing it when the remote description has
    /// not been applied yet. Queued candidates are flushed on apply.
    pub async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        if !self.remote_set.load(Ordering::Acquire) {
            let mut pending = self.pending_candidates.lock().await;
            // Re-check under the lock: the description may have been applied
            // while we waited, and a candidate parked after the flush would
            // never drain.
            if !self.remote_set.load(Ordering::Acquire) {
                debug!(peer = %self.remote_id, "queuing early remote candidate");
                pending.push(candidate);
                return Ok(());
            }
        }
        self.observe(self.pc.add_ice_candidate(candidate).await)
    }

    pub async fn pending_candidates(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    async fn mark_remote_ready(&self) {
        let queued = {
            let mut pending = self.pending_candidates.lock().await;
            self.remote_set.store(true, Ordering::Release);
            std::mem::take(&mut *pending)
        };
        for candidate in queued {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!(peer = %self.remote_id, error = %e, "queued candidate rejected");
            }
        }
    }

    /// Swaps the video sender's track in place; no renegotiation happens and
    /// audio senders and the data channel are untouched.
    pub async fn replace_video_sender(&self, track: Arc<TrackLocalStaticSample>) -> Result<()> {
        for sender in self.pc.get_senders().await {
            let is_video = match sender.track().await {
                Some(current) => current.kind() == RTPCodecType::Video,
                None => false,
            };
            if is_video {
                self.observe(
                    sender
                        .replace_track(Some(track.clone() as Arc<dyn TrackLocal + Send + Sync>))
                        .await,
                )?;
            }
        }
        Ok(())
    }

    /// Closes channel and transport. Safe while signaling is still in
    /// flight; later envelopes for this link are simply dropped upstream.
    pub async fn close(&self) {
        if let Some(dc) = self.channel.lock().await.take() {
            if let Err(e) = dc.close().await {
                debug!(peer = %self.remote_id, error = %e, "data channel close reported an error");
            }
        }
        if let Err(e) = self.pc.close().await {
            debug!(peer = %self.remote_id, error = %e, "transport close reported an error");
        }
    }

    fn observe<T>(&self, result: webrtc::error::Result<T>) -> Result<T> {
        result.map_err(|e| {
            self.monitor.set_error(e.to_string());
            Error::from(e)
        })
    }
}

async fn new_peer_connection() -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let api = APIBuilder::new().with_media_engine(media_engine).build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: STUN_SERVERS.iter().map(|s| (*s).to_owned()).collect(),
            ..Default::default()
        }],
        ..Default::default()
    };
    Ok(Arc::new(api.new_peer_connection(config).await?))
}

/// Installs the open/message handlers on a data channel and records it on
/// the link. Runs on whichever side the channel appears: created locally on
/// the initiator, announced by `on_data_channel` on the receiver.
async fn wire_channel(
    dc: Arc<RTCDataChannel>,
    slot: ChannelSlot,
    state: Arc<RoomState>,
    local_id: &str,
    remote_id: &str,
) {
    {
        // Initial-sync handshake: the first thing either side sends is its
        // current editor buffer, keyed by its own id.
        let channel = dc.clone();
        let state = state.clone();
        let local = local_id.to_owned();
        let peer = remote_id.to_owned();
        dc.on_open(Box::new(move || {
            let channel = channel.clone();
            let state = state.clone();
            let local = local.clone();
            let peer = peer.clone();
            Box::pin(async move {
                debug!(peer = %peer, "data channel open");
                let sync = ChannelEnvelope::Editor(EditorSync {
                    user_id: local,
                    content: state.local_editor().await,
                });
                match sync.encode() {
                    Ok(json) => {
                        if let Err(e) = channel.send_text(json).await {
                            warn!(peer = %peer, error = %e, "initial editor sync failed");
                        }
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "initial editor sync failed"),
                }
            })
        }));
    }

    {
        let state = state.clone();
        let peer = remote_id.to_owned();
        dc.on_message(Box::new(move |message: DataChannelMessage| {
            let state = state.clone();
            let peer = peer.clone();
            Box::pin(async move {
                let text = match std::str::from_utf8(&message.data) {
                    Ok(text) => text.to_owned(),
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "non-utf8 payload on chat channel");
                        return;
                    }
                };
                match ChannelEnvelope::decode(&text) {
                    Ok(envelope) => state.apply(envelope).await,
                    Err(e) => warn!(peer = %peer, error = %e, "unparseable chat-channel payload"),
                }
            })
        }));
    }

    *slot.lock().await = Some(dc);
}
