//! The local capture source shared by every peer link.

mod capture;
pub mod devices;
pub mod playback;

pub use devices::{DeviceCatalog, MediaDeviceInfo};
pub use playback::PlaybackHandle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nokhwa::utils::CameraIndex;
use tokio::sync::Mutex;
use tracing::{info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Error, Result};
use capture::CaptureHandle;

const MEDIA_STREAM_ID: &str = "lesson-media";

#[derive(Default)]
struct Workers {
    microphone: Option<CaptureHandle>,
    camera: Option<CaptureHandle>,
}

/// One active capture source per client. Every link attaches references to
/// the same tracks; only the camera-switch path replaces one of them, and it
/// does so without touching the microphone or any transport.
pub struct LocalMedia {
    audio: Mutex<Option<Arc<TrackLocalStaticSample>>>,
    video: Mutex<Option<Arc<TrackLocalStaticSample>>>,
    audio_enabled: Arc<AtomicBool>,
    video_enabled: Arc<AtomicBool>,
    workers: Mutex<Workers>,
    devices: Mutex<Option<DeviceCatalog>>,
    active_camera: Mutex<Option<String>>,
}

impl LocalMedia {
    pub fn new() -> Self {
        Self {
            audio: Mutex::new(None),
            video: Mutex::new(None),
            audio_enabled: Arc::new(AtomicBool::new(true)),
            video_enabled: Arc::new(AtomicBool::new(true)),
            workers: Mutex::new(Workers::default()),
            devices: Mutex::new(None),
            active_camera: Mutex::new(None),
        }
    }

    /// Starts microphone and camera capture. Either device may be missing;
    /// the result is an error only when nothing at all could be acquired,
    /// and the caller is expected to continue data-only in that case.
    pub async fn acquire(&self) -> Result<()> {
        let mut acquired = false;

        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            MEDIA_STREAM_ID.to_owned(),
        ));
        let worker = {
            let track = audio_track.clone();
            let enabled = self.audio_enabled.clone();
            tokio::task::spawn_blocking(move || capture::spawn_microphone(track, enabled)).await
        };
        match worker {
            Ok(Ok(handle)) => {
                *self.audio.lock().await = Some(audio_track);
                self.workers.lock().await.microphone = Some(handle);
                acquired = true;
                info!("microphone capture started");
            }
            Ok(Err(e)) => warn!(error = %e, "microphone unavailable"),
            Err(e) => warn!(error = %e, "microphone setup task failed"),
        }

        let video_track = new_video_track();
        let worker = {
            let track = video_track.clone();
            let enabled = self.video_enabled.clone();
            tokio::task::spawn_blocking(move || {
                capture::spawn_camera(track, enabled, CameraIndex::Index(0))
            })
            .await
        };
        match worker {
            Ok(Ok(handle)) => {
                *self.video.lock().await = Some(video_track);
                self.workers.lock().await.camera = Some(handle);
                *self.active_camera.lock().await = Some("0".to_owned());
                acquired = true;
                info!("camera capture started");
            }
            Ok(Err(e)) => warn!(error = %e, "camera unavailable"),
            Err(e) => warn!(error = %e, "camera setup task failed"),
        }

        // Device labels are only trustworthy once a capture session exists,
        // so the catalog is filled here and not re-polled automatically.
        if acquired && self.devices.lock().await.is_none() {
            match tokio::task::spawn_blocking(devices::enumerate).await {
                Ok(catalog) => *self.devices.lock().await = Some(catalog),
                Err(e) => warn!(error = %e, "device enumeration task failed"),
            }
        }

        if acquired {
            Ok(())
        } else {
            Err(Error::Media("no capture device available".into()))
        }
    }

    /// Every local track, for attaching to a new link. Empty when capture
    /// was never acquired.
    pub async fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(audio) = self.audio.lock().await.clone() {
            tracks.push(audio);
        }
        if let Some(video) = self.video.lock().await.clone() {
            tracks.push(video);
        }
        tracks
    }

    pub async fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.lock().await.clone()
    }

    /// Starts a capture for the requested camera and swaps the local video
    /// track. The microphone worker and the audio track are untouched; the
    /// caller propagates the returned track into open links.
    pub async fn switch_camera(&self, device_id: &str) -> Result<Arc<TrackLocalStaticSample>> {
        let index = devices::camera_index(device_id);
        let track = new_video_track();
        let handle = {
            let track = track.clone();
            let enabled = self.video_enabled.clone();
            tokio::task::spawn_blocking(move || capture::spawn_camera(track, enabled, index))
                .await
                .map_err(|e| Error::Media(e.to_string()))??
        };

        // Replacing the handle stops the previous camera worker.
        self.workers.lock().await.camera = Some(handle);
        *self.video.lock().await = Some(track.clone());
        *self.active_camera.lock().await = Some(device_id.to_owned());
        info!(camera = %device_id, "camera switched");
        Ok(track)
    }

    /// Installs a video track whose samples come from an external producer.
    pub async fn install_video_track(&self, track: Arc<TrackLocalStaticSample>) {
        *self.video.lock().await = Some(track);
    }

    pub async fn active_camera(&self) -> Option<String> {
        self.active_camera.lock().await.clone()
    }

    /// Catalog captured after the first successful acquisition, if any.
    pub async fn device_catalog(&self) -> Option<DeviceCatalog> {
        self.devices.lock().await.clone()
    }

    /// Explicit re-enumeration, the only way to pick up hot-plugged devices.
    pub async fn refresh_devices(&self) -> Result<DeviceCatalog> {
        let catalog = tokio::task::spawn_blocking(devices::enumerate)
            .await
            .map_err(|e| Error::Media(e.to_string()))?;
        *self.devices.lock().await = Some(catalog.clone());
        Ok(catalog)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::Relaxed)
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.video_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::Relaxed)
    }

    /// Stops every capture worker and drops the local tracks.
    pub async fn stop(&self) {
        *self.workers.lock().await = Workers::default();
        *self.audio.lock().await = None;
        *self.video.lock().await = None;
        *self.active_camera.lock().await = None;
    }
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self::new()
    }
}

fn new_video_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            ..Default::default()
        },
        "video".to_owned(),
        MEDIA_STREAM_ID.to_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mute_flags_are_local_toggles() {
        let media = LocalMedia::new();
        assert!(media.audio_enabled());
        assert!(media.video_enabled());

        media.set_audio_enabled(false);
        media.set_video_enabled(false);
        assert!(!media.audio_enabled());
        assert!(!media.video_enabled());

        media.set_audio_enabled(true);
        assert!(media.audio_enabled());
        assert!(!media.video_enabled());
    }

    #[tokio::test]
    async fn unacquired_media_attaches_zero_tracks() {
        let media = LocalMedia::new();
        assert!(media.tracks().await.is_empty());
        assert!(media.video_track().await.is_none());
        assert!(media.device_catalog().await.is_none());
    }

    #[tokio::test]
    async fn installed_track_is_listed() {
        let media = LocalMedia::new();
        media.install_video_track(new_video_track()).await;
        assert_eq!(media.tracks().await.len(), 1);
        assert!(media.video_track().await.is_some());
    }
}
