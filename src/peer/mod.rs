//! Ownership of every direct peer transport in the current room.

mod link;
mod monitor;

pub use link::PeerLink;
pub use monitor::{ConnectionMonitor, LinkStatus};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::channel::ChannelEnvelope;
use crate::error::{Error, Result};
use crate::media::LocalMedia;
use crate::room::state::RoomState;
use crate::signaling::SignalEvent;

/// Owns the remote-id → [`PeerLink`] map and the lifecycle of each entry.
///
/// At most one link exists per remote id; a rejoining participant arrives
/// under a fresh id, and a fresh link. Links register in the map before
/// `create_link` returns, so an envelope arriving in the same tick always
/// finds its link.
pub struct PeerManager {
    local_id: String,
    media: Arc<LocalMedia>,
    state: Arc<RoomState>,
    signal_tx: mpsc::Sender<SignalEvent>,
    links: Mutex<HashMap<String, Arc<PeerLink>>>,
}

impl PeerManager {
    pub fn new(
        local_id: String,
        media: Arc<LocalMedia>,
        state: Arc<RoomState>,
        signal_tx: mpsc::Sender<SignalEvent>,
    ) -> Self {
        Self {
            local_id,
            media,
            state,
            signal_tx,
            links: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Builds and registers the link for `remote_id`. The initiator flag is
    /// decided once by the membership protocol and never re-derived here.
    pub async fn create_link(&self, remote_id: &str, initiator: bool) -> Result<Arc<PeerLink>> {
        let mut links = self.links.lock().await;
        if links.contains_key(remote_id) {
            return Err(Error::LinkExists(remote_id.to_owned()));
        }

        let tracks = self.media.tracks().await;
        let link = PeerLink::connect(
            &self.local_id,
            remote_id,
            initiator,
            self.signal_tx.clone(),
            self.state.clone(),
            tracks,
        )
        .await?;

        links.insert(remote_id.to_owned(), link.clone());
        info!(peer = %remote_id, initiator, "peer link created");
        Ok(link)
    }

    pub async fn link(&self, remote_id: &str) -> Option<Arc<PeerLink>> {
        self.links.lock().await.get(remote_id).cloned()
    }

    pub async fn link_count(&self) -> usize {
        self.links.lock().await.len()
    }

    /// Tears down the link for `remote_id`. A second call for the same id,
    /// or a call for an id that never had a link, is a no-op.
    pub async fn destroy_link(&self, remote_id: &str) {
        let link = self.links.lock().await.remove(remote_id);
        match link {
            Some(link) => {
                link.close().await;
                self.state.drop_peer(remote_id).await;
                info!(peer = %remote_id, "peer link destroyed");
            }
            None => debug!(peer = %remote_id, "teardown for absent link ignored"),
        }
    }

    pub async fn destroy_all(&self) {
        let ids: Vec<String> = self.links.lock().await.keys().cloned().collect();
        for id in ids {
            self.destroy_link(&id).await;
        }
    }

    /// Sends one envelope over every open data channel. Per-link failures
    /// are logged and never affect the other links.
    pub async fn broadcast(&self, envelope: &ChannelEnvelope) {
        let json = match envelope.encode() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "unserializable channel envelope");
                return;
            }
        };
        let links: Vec<Arc<PeerLink>> = self.links.lock().await.values().cloned().collect();
        for link in links {
            let Some(dc) = link.channel().await else { continue };
            if dc.ready_state() != RTCDataChannelState::Open {
                continue;
            }
            if let Err(e) = dc.send_text(json.clone()).await {
                warn!(peer = %link.remote_id(), error = %e, "channel send failed");
            }
        }
    }

    /// Propagates a replacement video track into every open link without
    /// renegotiation.
    pub async fn replace_video_track(&self, track: Arc<TrackLocalStaticSample>) {
        let links: Vec<Arc<PeerLink>> = self.links.lock().await.values().cloned().collect();
        for link in links {
            if let Err(e) = link.replace_video_sender(track.clone()).await {
                warn!(peer = %link.remote_id(), error = %e, "video track swap failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (PeerManager, mpsc::Receiver<SignalEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let media = Arc::new(LocalMedia::new());
        let state = Arc::new(RoomState::new());
        (PeerManager::new("local".into(), media, state, tx), rx)
    }

    #[tokio::test]
    async fn one_link_per_remote_id() {
        let (manager, _rx) = manager();
        manager.create_link("peer-a", true).await.unwrap();
        assert!(manager.link("peer-a").await.is_some());

        let err = manager
            .create_link("peer-a", false)
            .await
            .err()
            .expect("duplicate link must be rejected");
        match err {
            Error::LinkExists(id) => assert_eq!(id, "peer-a"),
            other => panic!("expected LinkExists, got {other:?}"),
        }

        // After a full teardown a fresh link for the same id is legal again.
        manager.destroy_link("peer-a").await;
        manager.create_link("peer-a", false).await.unwrap();
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let (manager, _rx) = manager();
        manager.create_link("peer-a", true).await.unwrap();
        assert_eq!(manager.link_count().await, 1);

        manager.destroy_link("peer-a").await;
        assert_eq!(manager.link_count().await, 0);
        manager.destroy_link("peer-a").await;
        manager.destroy_link("never-existed").await;
        assert_eq!(manager.link_count().await, 0);
    }

    #[tokio::test]
    async fn destroy_all_empties_the_map() {
        let (manager, _rx) = manager();
        manager.create_link("peer-a", true).await.unwrap();
        manager.create_link("peer-b", true).await.unwrap();
        manager.create_link("peer-c", false).await.unwrap();
        assert_eq!(manager.link_count().await, 3);

        manager.destroy_all().await;
        assert_eq!(manager.link_count().await, 0);
    }

    #[tokio::test]
    async fn initiator_owns_the_data_channel() {
        let (manager, _rx) = manager();
        let offerer = manager.create_link("peer-a", true).await.unwrap();
        let receiver = manager.create_link("peer-b", false).await.unwrap();

        // The initiator creates "chat" right away; the receiver has nothing
        // until the remote side announces one.
        assert!(offerer.channel().await.is_some());
        assert!(receiver.channel().await.is_none());
    }

    #[tokio::test]
    async fn camera_swap_leaves_channels_untouched() {
        use webrtc::api::media_engine::MIME_TYPE_VP8;
        use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

        let (tx, _rx) = mpsc::channel(16);
        let media = Arc::new(LocalMedia::new());
        let first = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "capture".to_owned(),
        ));
        media.install_video_track(first.clone()).await;

        let state = Arc::new(RoomState::new());
        let manager = PeerManager::new("local".into(), media.clone(), state, tx);
        let link = manager.create_link("peer-a", true).await.unwrap();
        let channel_before = link.channel().await.unwrap();

        let second = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "capture".to_owned(),
        ));
        media.install_video_track(second.clone()).await;
        manager.replace_video_track(second.clone()).await;

        let channel_after = link.channel().await.unwrap();
        assert!(Arc::ptr_eq(&channel_before, &channel_after));
        assert_ne!(channel_after.ready_state(), RTCDataChannelState::Closed);

        let current = media.video_track().await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));
    }
}
