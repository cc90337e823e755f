//! Playback stage (CPAL output stream).
//!
//! The CPAL callback pulls straight from an [`AudioSource`]: every block the device asks
//! for is one `read` on the source, so a [`crate::VarispeedSource`] at the head of the
//! chain sees the device's cadence. The callback:
//! - maps source channels onto device channels (mono<->stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format
//! - outputs silence after end of stream or a source error

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::source::AudioSource;

/// Optional hooks for the playback callback.
#[derive(Clone, Debug, Default)]
pub struct PlaybackConfig {
    /// When set and `true`, the callback outputs silence and does not pull the source.
    pub paused: Option<Arc<AtomicBool>>,
}

/// Observes a running output stream.
#[derive(Clone, Debug, Default)]
pub struct PlaybackHandle {
    finished: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl PlaybackHandle {
    /// Source reached end of stream (or failed).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Build a CPAL output stream that plays `source`.
///
/// `source` must already run at `config.sample_rate`.
pub fn build_output_stream<S>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    source: S,
    cfg: PlaybackConfig,
) -> Result<(cpal::Stream, PlaybackHandle)>
where
    S: AudioSource + Send + 'static,
{
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32, S>(device, config, source, cfg),
        cpal::SampleFormat::I16 => build_stream::<i16, S>(device, config, source, cfg),
        cpal::SampleFormat::I32 => build_stream::<i32, S>(device, config, source, cfg),
        cpal::SampleFormat::U16 => build_stream::<u16, S>(device, config, source, cfg),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T, S>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut source: S,
    cfg: PlaybackConfig,
) -> Result<(cpal::Stream, PlaybackHandle)>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
    S: AudioSource + Send + 'static,
{
    let dst_channels = config.channels as usize;
    let src_channels = source.format().channels;
    let handle = PlaybackHandle::default();

    let finished = handle.finished.clone();
    let failed = handle.failed.clone();
    let mut scratch: Vec<f32> = Vec::new();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if cfg.paused.as_ref().is_some_and(|p| p.load(Ordering::Relaxed))
                || finished.load(Ordering::Relaxed)
            {
                data.fill(silence);
                return;
            }

            let frames = data.len() / dst_channels;
            let wanted = frames * src_channels;
            if scratch.len() < wanted {
                scratch.resize(wanted, 0.0);
            }

            let got = match source.read(&mut scratch[..wanted]) {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("playback source error: {e:#}");
                    failed.store(true, Ordering::Release);
                    0
                }
            };
            let got_frames = got / src_channels;
            if got < wanted {
                finished.store(true, Ordering::Release);
            }

            for (frame, out) in data.chunks_mut(dst_channels).enumerate() {
                if frame < got_frames {
                    let src = &scratch[frame * src_channels..(frame + 1) * src_channels];
                    for (ch, sample) in out.iter_mut().enumerate() {
                        *sample = <T as cpal::Sample>::from_sample::<f32>(map_sample(
                            src,
                            dst_channels,
                            ch,
                        ));
                    }
                } else {
                    out.fill(silence);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok((stream, handle))
}

/// Output sample for `dst_ch` from one interleaved source frame.
///
/// - mono -> stereo: duplicate channel 0
/// - stereo -> mono: average L/R
/// - otherwise: clamp to the available source channels
fn map_sample(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (src.len(), dst_channels) {
        (2, 1) => 0.5 * (src[0] + src[1]),
        (0, _) => 0.0,
        (n, _) => src[dst_ch.min(n - 1)],
    }
}
