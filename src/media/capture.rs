//! Capture workers. cpal and nokhwa streams are not `Send`, so each capture
//! session lives on its own OS thread; dropping the returned handle
//! disconnects the stop channel and the worker shuts itself down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tracing::warn;
use webrtc::media::Sample as MediaSample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{Error, Result};

/// Keeps one capture worker alive; dropping it stops the worker.
pub struct CaptureHandle {
    _stop: std_mpsc::Sender<()>,
}

pub fn spawn_microphone(
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
) -> Result<CaptureHandle> {
    let (ready_tx, ready_rx) = std_mpsc::channel();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    thread::Builder::new()
        .name("mic-capture".into())
        .spawn(move || {
            let stream = match build_input_stream(track, enabled) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(Error::Media(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Parked until the handle goes away.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| Error::Media(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle { _stop: stop_tx }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Media("capture thread exited during setup".into())),
    }
}

fn build_input_stream(
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Media("no input device available".into()))?;
    let config = device
        .default_input_config()
        .map_err(|e| Error::Media(e.to_string()))?;

    match config.sample_format() {
        SampleFormat::F32 => build_typed_input::<f32>(&device, &config.into(), track, enabled),
        SampleFormat::I16 => build_typed_input::<i16>(&device, &config.into(), track, enabled),
        SampleFormat::U16 => build_typed_input::<u16>(&device, &config.into(), track, enabled),
        other => Err(Error::Media(format!("unsupported sample format: {other:?}"))),
    }
}

fn build_typed_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels).max(1);
    let sample_rate = config.sample_rate.0.max(1);
    let err_fn = |err: cpal::StreamError| warn!(error = %err, "input stream error");

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(data.len() * 4);
                if enabled.load(Ordering::Relaxed) {
                    for sample in data {
                        bytes.extend_from_slice(&f32::from_sample(*sample).to_le_bytes());
                    }
                } else {
                    // Muted: peers receive silence, not a track removal.
                    bytes.resize(data.len() * 4, 0);
                }
                let frames = (data.len() / channels) as u64;
                let duration =
                    Duration::from_micros(frames.saturating_mul(1_000_000) / u64::from(sample_rate));
                let sample = MediaSample {
                    data: Bytes::from(bytes),
                    duration,
                    ..Default::default()
                };
                if let Err(e) = futures::executor::block_on(track.write_sample(&sample)) {
                    warn!(error = %e, "failed to write audio sample");
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Media(e.to_string()))?;

    Ok(stream)
}

pub fn spawn_camera(
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    index: CameraIndex,
) -> Result<CaptureHandle> {
    let (ready_tx, ready_rx) = std_mpsc::channel();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            let format =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
            let mut camera = match Camera::new(index, format) {
                Ok(camera) => camera,
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::Media(e.to_string())));
                    return;
                }
            };
            if let Err(e) = camera.open_stream() {
                let _ = ready_tx.send(Err(Error::Media(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            let frame_duration =
                Duration::from_millis(1_000 / u64::from(camera.frame_rate().max(1)));
            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(std_mpsc::TryRecvError::Disconnected) => break,
                    Err(std_mpsc::TryRecvError::Empty) => {}
                }
                if !enabled.load(Ordering::Relaxed) {
                    // Camera off: peers keep the last delivered frame.
                    thread::sleep(frame_duration);
                    continue;
                }
                match camera.frame() {
                    Ok(frame) => match frame.decode_image::<RgbFormat>() {
                        Ok(image) => {
                            let sample = MediaSample {
                                data: Bytes::from(image.into_raw()),
                                duration: frame_duration,
                                ..Default::default()
                            };
                            if let Err(e) =
                                futures::executor::block_on(track.write_sample(&sample))
                            {
                                warn!(error = %e, "failed to write video sample");
                            }
                        }
                        Err(e) => warn!(error = %e, "camera frame decode failed"),
                    },
                    Err(e) => {
                        warn!(error = %e, "camera frame read failed");
                        thread::sleep(frame_duration);
                    }
                }
            }
            let _ = camera.stop_stream();
        })
        .map_err(|e| Error::Media(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle { _stop: stop_tx }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Media("capture thread exited during setup".into())),
    }
}
