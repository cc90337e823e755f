//! Time/pitch-stretching engine capability.
//!
//! The adapter drives an engine through [`StretchEngine`] only, so the stretching
//! algorithm can be swapped (or mocked) without touching the feed/drain loop.
//!
//! Two implementations ship with the crate:
//! - [`NativeEngine`]: pure Rust (WSOLA tempo stage + Rubato rate stage).
//! - `SoundTouchEngine` (feature `soundtouch`): binding to the SoundTouch library.

use anyhow::Result;

mod native;
#[cfg(feature = "soundtouch")]
mod soundtouch;
mod tempo;

pub use native::NativeEngine;
#[cfg(feature = "soundtouch")]
pub use soundtouch::SoundTouchEngine;
pub use tempo::{TempoStretcher, WsolaParams};

/// Stateful stretching engine operating on interleaved `f32` frames.
///
/// Counts passed across this trait are **frames**, not samples, except for slice
/// lengths. Multipliers are applied to the audio fed after the call.
pub trait StretchEngine {
    /// Set the input format. Called once before any samples are fed.
    fn configure(&mut self, sample_rate: u32, channels: usize) -> Result<()>;

    /// Playback-rate multiplier: changes duration and pitch.
    fn set_rate(&mut self, rate: f32);

    /// Tempo multiplier: changes duration, preserves pitch.
    fn set_tempo(&mut self, tempo: f32);

    /// Pitch offset in octaves (0.0 = unchanged).
    fn set_pitch_octaves(&mut self, octaves: f32);

    fn set_anti_aliasing(&mut self, enabled: bool);

    fn set_quick_seek(&mut self, enabled: bool);

    /// Feed `frames` frames from the front of `samples`.
    fn put_samples(&mut self, samples: &[f32], frames: usize) -> Result<()>;

    /// Frames ready to be received.
    fn available_frames(&self) -> usize;

    /// Move up to `max_frames` processed frames into `buf`; returns frames written.
    fn receive_samples(&mut self, buf: &mut [f32], max_frames: usize) -> Result<usize>;

    /// Push any internally buffered input through so it becomes receivable.
    ///
    /// Calling `flush` again with no new input must not produce more output.
    fn flush(&mut self) -> Result<()>;

    /// Discard all buffered input and output.
    fn clear(&mut self);

    /// Release engine resources. No other call is made afterwards.
    fn dispose(&mut self) {}
}

impl<E: StretchEngine + ?Sized> StretchEngine for Box<E> {
    fn configure(&mut self, sample_rate: u32, channels: usize) -> Result<()> {
        (**self).configure(sample_rate, channels)
    }

    fn set_rate(&mut self, rate: f32) {
        (**self).set_rate(rate)
    }

    fn set_tempo(&mut self, tempo: f32) {
        (**self).set_tempo(tempo)
    }

    fn set_pitch_octaves(&mut self, octaves: f32) {
        (**self).set_pitch_octaves(octaves)
    }

    fn set_anti_aliasing(&mut self, enabled: bool) {
        (**self).set_anti_aliasing(enabled)
    }

    fn set_quick_seek(&mut self, enabled: bool) {
        (**self).set_quick_seek(enabled)
    }

    fn put_samples(&mut self, samples: &[f32], frames: usize) -> Result<()> {
        (**self).put_samples(samples, frames)
    }

    fn available_frames(&self) -> usize {
        (**self).available_frames()
    }

    fn receive_samples(&mut self, buf: &mut [f32], max_frames: usize) -> Result<usize> {
        (**self).receive_samples(buf, max_frames)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn dispose(&mut self) {
        (**self).dispose()
    }
}
