//! Remote audio playback: an async reader drains the remote track's RTP
//! payloads into a channel, and a dedicated thread owns the cpal output
//! stream that plays them.

use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use tracing::warn;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{Error, Result};

/// Keeps one playback session alive; dropping it stops the output stream
/// and ends the reader task.
pub struct PlaybackHandle {
    _stop: std_mpsc::Sender<()>,
}

/// Must be called from a tokio runtime (spawns the RTP reader task).
pub fn spawn(track: Arc<TrackRemote>) -> Result<PlaybackHandle> {
    let (sample_tx, sample_rx) = std_mpsc::channel::<Vec<f32>>();

    tokio::spawn(async move {
        while let Ok((rtp, _)) = track.read_rtp().await {
            let payload = rtp.payload;
            let mut samples = Vec::with_capacity(payload.len() / 4);
            for chunk in payload.chunks_exact(4) {
                samples.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
            if sample_tx.send(samples).is_err() {
                break;
            }
        }
    });

    let (ready_tx, ready_rx) = std_mpsc::channel();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    thread::Builder::new()
        .name("audio-playback".into())
        .spawn(move || {
            let stream = match build_output_stream(sample_rx) {
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
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| Error::Media(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(PlaybackHandle { _stop: stop_tx }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Media("playback thread exited during setup".into())),
    }
}

fn build_output_stream(sample_rx: std_mpsc::Receiver<Vec<f32>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Media("no output device available".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| Error::Media(e.to_string()))?;

    match config.sample_format() {
        SampleFormat::F32 => build_typed_output::<f32>(&device, &config.into(), sample_rx),
        SampleFormat::I16 => build_typed_output::<i16>(&device, &config.into(), sample_rx),
        SampleFormat::U16 => build_typed_output::<u16>(&device, &config.into(), sample_rx),
        other => Err(Error::Media(format!("unsupported sample format: {other:?}"))),
    }
}

fn build_typed_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_rx: std_mpsc::Receiver<Vec<f32>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let err_fn = |err: cpal::StreamError| warn!(error = %err, "output stream error");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if let Ok(samples) = sample_rx.try_recv() {
                    for (out, sample) in data.iter_mut().zip(samples.iter()) {
                        *out = T::from_sample(*sample);
                    }
                    if samples.len() < data.len() {
                        for out in data[samples.len()..].iter_mut() {
                            *out = T::EQUILIBRIUM;
                        }
                    }
                } else {
                    // Nothing buffered: play silence.
                    for out in data.iter_mut() {
                        *out = T::EQUILIBRIUM;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Media(e.to_string()))?;

    Ok(stream)
}
