//! Fixed sample format shared by a source and everything pulling from it.

use anyhow::{Result, anyhow};
use symphonia::core::audio::SignalSpec;

/// Interleaved `f32` stream format.
///
/// Fixed for the lifetime of a playback session: the adapter inherits it from its
/// source and never changes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Format {
    pub sample_rate: u32,
    pub channels: usize,
}

impl Format {
    /// Build a format, rejecting a zero sample rate or channel count.
    pub fn new(sample_rate: u32, channels: usize) -> Result<Self> {
        if sample_rate == 0 {
            return Err(anyhow!("sample rate must be non-zero"));
        }
        if channels == 0 {
            return Err(anyhow!("channel count must be non-zero"));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Number of interleaved samples covering `ms` milliseconds, rounded down to whole
    /// frames and never less than one frame.
    pub fn samples_for_ms(&self, ms: u32) -> usize {
        let frames = (self.sample_rate as u64 * ms as u64 / 1000) as usize;
        frames.max(1) * self.channels
    }

    /// Convert a frame count to milliseconds.
    pub fn frames_to_ms(&self, frames: u64) -> u64 {
        frames.saturating_mul(1000) / self.sample_rate as u64
    }

    /// Convert milliseconds to a frame count.
    pub fn ms_to_frames(&self, ms: u64) -> u64 {
        ms.saturating_mul(self.sample_rate as u64) / 1000
    }
}

impl TryFrom<SignalSpec> for Format {
    type Error = anyhow::Error;

    fn try_from(spec: SignalSpec) -> Result<Self> {
        Format::new(spec.rate, spec.channels.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::Channels;

    #[test]
    fn new_rejects_zero_fields() {
        assert!(Format::new(0, 2).is_err());
        assert!(Format::new(48_000, 0).is_err());
        assert!(Format::new(48_000, 2).is_ok());
    }

    #[test]
    fn samples_for_ms_rounds_to_whole_frames() {
        let fmt = Format::new(44_100, 2).unwrap();
        assert_eq!(fmt.samples_for_ms(100), 8_820);

        let fmt = Format::new(22_050, 3).unwrap();
        // 2205.0 frames
        assert_eq!(fmt.samples_for_ms(100), 6_615);
        assert_eq!(fmt.samples_for_ms(0), 3);
    }

    #[test]
    fn frame_ms_conversions() {
        let fmt = Format::new(48_000, 2).unwrap();
        assert_eq!(fmt.frames_to_ms(96_000), 2_000);
        assert_eq!(fmt.ms_to_frames(1_500), 72_000);
    }

    #[test]
    fn converts_from_signal_spec() {
        let spec = SignalSpec::new(48_000, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let fmt = Format::try_from(spec).unwrap();
        assert_eq!(fmt, Format::new(48_000, 2).unwrap());
    }
}
