//! Pure-Rust stretching engine.
//!
//! Two stages, mirroring how rate, tempo and pitch compose:
//!
//! ```text
//! input -> TempoStretcher (tempo / pitch) -> StreamResampler (1 / (rate * pitch)) -> output
//! ```
//!
//! The resampler stage is only created once a non-unity transposition is requested, so
//! pure tempo playback never pays for it.

use anyhow::{Result, bail};

use super::StretchEngine;
use super::tempo::{TempoStretcher, WsolaParams};
use crate::profile::is_unity_rate;
use crate::resample::{DEFAULT_CHUNK_FRAMES, ResampleQuality, StreamResampler};

struct Stages {
    channels: usize,
    stretcher: TempoStretcher,
    transposer: Option<StreamResampler>,
    stretched: Vec<f32>,
    output: Vec<f32>,
    read_pos: usize,
}

impl Stages {
    fn available_frames(&self) -> usize {
        (self.output.len() - self.read_pos) / self.channels
    }

    /// Move stretched audio through the transposer (if any) into the output.
    fn route(&mut self, flush: bool) -> Result<()> {
        match self.transposer.as_mut() {
            Some(t) => {
                t.push(&self.stretched, &mut self.output)?;
                if flush {
                    t.flush(&mut self.output)?;
                }
            }
            None => self.output.extend_from_slice(&self.stretched),
        }
        self.stretched.clear();
        Ok(())
    }
}

/// Default [`StretchEngine`]: WSOLA tempo stage plus Rubato rate stage.
pub struct NativeEngine {
    params: WsolaParams,
    chunk_frames: usize,
    stages: Option<Stages>,
    rate: f32,
    tempo: f32,
    pitch_octaves: f32,
    anti_aliasing: bool,
    quick_seek: bool,
    dirty: bool,
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self::new(WsolaParams::default())
    }
}

impl NativeEngine {
    pub fn new(params: WsolaParams) -> Self {
        Self {
            params,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            stages: None,
            rate: 1.0,
            tempo: 1.0,
            pitch_octaves: 0.0,
            anti_aliasing: false,
            quick_seek: false,
            dirty: true,
        }
    }

    /// Transposer chunk size in frames; smaller means lower latency.
    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames.max(1);
        self
    }

    fn quality(&self) -> ResampleQuality {
        if self.anti_aliasing {
            ResampleQuality::High
        } else {
            ResampleQuality::Fast
        }
    }

    fn apply_params(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let quality = self.quality();
        let chunk_frames = self.chunk_frames;
        let Some(stages) = self.stages.as_mut() else {
            return Ok(());
        };

        let pitch = 2f64.powf(self.pitch_octaves as f64);
        stages.stretcher.set_tempo(self.tempo as f64 / pitch);
        stages.stretcher.set_quick_seek(self.quick_seek);

        let transpose = self.rate as f64 * pitch;
        match stages.transposer.as_mut() {
            Some(t) => {
                t.set_quality(quality)?;
                t.set_ratio(1.0 / transpose)?;
            }
            None if !is_unity_rate(transpose as f32) => {
                stages.transposer = Some(StreamResampler::new(
                    1.0 / transpose,
                    stages.channels,
                    chunk_frames,
                    quality,
                )?);
                tracing::debug!(transpose, "native engine transposer created");
            }
            None => {}
        }
        self.dirty = false;
        Ok(())
    }

    fn stages_mut(&mut self) -> Result<&mut Stages> {
        match self.stages.as_mut() {
            Some(s) => Ok(s),
            None => bail!("stretch engine used before configure or after dispose"),
        }
    }
}

impl StretchEngine for NativeEngine {
    fn configure(&mut self, sample_rate: u32, channels: usize) -> Result<()> {
        if sample_rate == 0 || channels == 0 {
            bail!("invalid engine format: {sample_rate} Hz, {channels} channels");
        }
        self.stages = Some(Stages {
            channels,
            stretcher: TempoStretcher::new(sample_rate, channels, self.params),
            transposer: None,
            stretched: Vec::new(),
            output: Vec::new(),
            read_pos: 0,
        });
        self.dirty = true;
        tracing::debug!(sample_rate, channels, "native engine configured");
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
        self.dirty = true;
    }

    fn set_tempo(&mut self, tempo: f32) {
        self.tempo = tempo;
        self.dirty = true;
    }

    fn set_pitch_octaves(&mut self, octaves: f32) {
        self.pitch_octaves = octaves;
        self.dirty = true;
    }

    fn set_anti_aliasing(&mut self, enabled: bool) {
        self.anti_aliasing = enabled;
        self.dirty = true;
    }

    fn set_quick_seek(&mut self, enabled: bool) {
        self.quick_seek = enabled;
        self.dirty = true;
    }

    fn put_samples(&mut self, samples: &[f32], frames: usize) -> Result<()> {
        self.apply_params()?;
        let stages = self.stages_mut()?;
        let len = frames * stages.channels;
        if samples.len() < len {
            bail!(
                "put_samples: {frames} frames requested but only {} samples given",
                samples.len()
            );
        }
        stages.stretcher.put(&samples[..len], &mut stages.stretched);
        stages.route(false)
    }

    fn available_frames(&self) -> usize {
        self.stages.as_ref().map_or(0, Stages::available_frames)
    }

    fn receive_samples(&mut self, buf: &mut [f32], max_frames: usize) -> Result<usize> {
        let stages = self.stages_mut()?;
        let ch = stages.channels;
        let frames = max_frames
            .min(stages.available_frames())
            .min(buf.len() / ch);
        let n = frames * ch;
        buf[..n].copy_from_slice(&stages.output[stages.read_pos..stages.read_pos + n]);
        stages.read_pos += n;
        if stages.read_pos == stages.output.len() {
            stages.output.clear();
            stages.read_pos = 0;
        } else if stages.read_pos > stages.output.len() / 2 {
            stages.output.drain(..stages.read_pos);
            stages.read_pos = 0;
        }
        Ok(frames)
    }

    fn flush(&mut self) -> Result<()> {
        self.apply_params()?;
        let stages = self.stages_mut()?;
        stages.stretcher.flush(&mut stages.stretched);
        stages.route(true)
    }

    fn clear(&mut self) {
        if let Some(stages) = self.stages.as_mut() {
            stages.stretcher.clear();
            if let Some(t) = stages.transposer.as_mut() {
                t.reset();
            }
            stages.stretched.clear();
            stages.output.clear();
            stages.read_pos = 0;
        }
    }

    fn dispose(&mut self) {
        self.stages = None;
    }
}
