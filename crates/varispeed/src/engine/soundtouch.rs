//! SoundTouch-backed engine (feature `soundtouch`).

use anyhow::{Result, bail};
use soundtouch::{Setting, SoundTouch};

use super::StretchEngine;
use super::tempo::WsolaParams;

struct Processor(SoundTouch);

// SAFETY: the processor is owned by exactly one engine and only touched through
// `&mut self`, so its internal pointers are never shared across threads.
unsafe impl Send for Processor {}

/// [`StretchEngine`] over the SoundTouch library.
pub struct SoundTouchEngine {
    processor: Option<Processor>,
    params: WsolaParams,
    channels: usize,
    fed_since_flush: bool,
}

impl Default for SoundTouchEngine {
    fn default() -> Self {
        Self::new(WsolaParams::default())
    }
}

impl SoundTouchEngine {
    pub fn new(params: WsolaParams) -> Self {
        Self {
            processor: None,
            params,
            channels: 1,
            fed_since_flush: false,
        }
    }

    fn st(&mut self) -> Option<&mut SoundTouch> {
        self.processor.as_mut().map(|p| &mut p.0)
    }

    fn st_checked(&mut self) -> Result<&mut SoundTouch> {
        match self.processor.as_mut() {
            Some(p) => Ok(&mut p.0),
            None => bail!("soundtouch engine used before configure or after dispose"),
        }
    }
}

impl StretchEngine for SoundTouchEngine {
    fn configure(&mut self, sample_rate: u32, channels: usize) -> Result<()> {
        if sample_rate == 0 || channels == 0 {
            bail!("invalid engine format: {sample_rate} Hz, {channels} channels");
        }
        let mut st = SoundTouch::new();
        st.set_sample_rate(sample_rate);
        st.set_channels(channels as u32);
        st.set_setting(Setting::SequenceMs, self.params.sequence_ms as i64);
        st.set_setting(Setting::SeekwindowMs, self.params.seek_window_ms as i64);
        st.set_setting(Setting::OverlapMs, self.params.overlap_ms as i64);
        self.processor = Some(Processor(st));
        self.channels = channels;
        tracing::debug!(sample_rate, channels, "soundtouch engine configured");
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) {
        if let Some(st) = self.st() {
            st.set_rate(rate as f64);
        }
    }

    fn set_tempo(&mut self, tempo: f32) {
        if let Some(st) = self.st() {
            st.set_tempo(tempo as f64);
        }
    }

    fn set_pitch_octaves(&mut self, octaves: f32) {
        if let Some(st) = self.st() {
            st.set_pitch_octaves(octaves as f64);
        }
    }

    fn set_anti_aliasing(&mut self, enabled: bool) {
        if let Some(st) = self.st() {
            st.set_setting(Setting::UseAaFilter, enabled as i64);
        }
    }

    fn set_quick_seek(&mut self, enabled: bool) {
        if let Some(st) = self.st() {
            st.set_setting(Setting::UseQuickseek, enabled as i64);
        }
    }

    fn put_samples(&mut self, samples: &[f32], frames: usize) -> Result<()> {
        let len = frames * self.channels;
        if samples.len() < len {
            bail!(
                "put_samples: {frames} frames requested but only {} samples given",
                samples.len()
            );
        }
        self.st_checked()?.put_samples(&samples[..len], frames);
        self.fed_since_flush = true;
        Ok(())
    }

    fn available_frames(&self) -> usize {
        self.processor
            .as_ref()
            .map_or(0, |p| p.0.num_samples() as usize)
    }

    fn receive_samples(&mut self, buf: &mut [f32], max_frames: usize) -> Result<usize> {
        let max_frames = max_frames.min(buf.len() / self.channels);
        Ok(self.st_checked()?.receive_samples(buf, max_frames))
    }

    fn flush(&mut self) -> Result<()> {
        let fed = self.fed_since_flush;
        let st = self.st_checked()?;
        if fed {
            st.flush();
        }
        self.fed_since_flush = false;
        Ok(())
    }

    fn clear(&mut self) {
        if let Some(st) = self.st() {
            st.clear();
        }
        self.fed_since_flush = false;
    }

    fn dispose(&mut self) {
        self.processor = None;
    }
}
