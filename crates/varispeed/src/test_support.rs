//! Deterministic sources and engines for unit tests.

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

use crate::engine::StretchEngine;
use crate::format::Format;
use crate::source::AudioSource;

/// Engine call recorded by [`FifoEngine`]. Receives are not recorded.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCall {
    Configure(u32, usize),
    SetRate(f32),
    SetTempo(f32),
    SetPitchOctaves(f32),
    SetAntiAliasing(bool),
    SetQuickSeek(bool),
    Put(usize),
    Flush,
    Clear,
    Dispose,
}

pub type CallLog = Arc<Mutex<Vec<EngineCall>>>;

/// Pass-through engine that holds back `latency_frames` until flushed and can repeat
/// every input frame `repeat` times to mimic slow-rate expansion.
pub struct FifoEngine {
    calls: CallLog,
    channels: usize,
    buffer: Vec<f32>,
    latency_frames: usize,
    repeat: usize,
    flushed: bool,
    fail_on_put: bool,
}

impl FifoEngine {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            channels: 1,
            buffer: Vec::new(),
            latency_frames: 0,
            repeat: 1,
            flushed: false,
            fail_on_put: false,
        }
    }

    pub fn with_latency(mut self, frames: usize) -> Self {
        self.latency_frames = frames;
        self
    }

    pub fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat.max(1);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_on_put = true;
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl StretchEngine for FifoEngine {
    fn configure(&mut self, sample_rate: u32, channels: usize) -> Result<()> {
        self.channels = channels;
        self.record(EngineCall::Configure(sample_rate, channels));
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) {
        self.record(EngineCall::SetRate(rate));
    }

    fn set_tempo(&mut self, tempo: f32) {
        self.record(EngineCall::SetTempo(tempo));
    }

    fn set_pitch_octaves(&mut self, octaves: f32) {
        self.record(EngineCall::SetPitchOctaves(octaves));
    }

    fn set_anti_aliasing(&mut self, enabled: bool) {
        self.record(EngineCall::SetAntiAliasing(enabled));
    }

    fn set_quick_seek(&mut self, enabled: bool) {
        self.record(EngineCall::SetQuickSeek(enabled));
    }

    fn put_samples(&mut self, samples: &[f32], frames: usize) -> Result<()> {
        self.record(EngineCall::Put(frames));
        if self.fail_on_put {
            bail!("engine failure");
        }
        for frame in samples[..frames * self.channels].chunks(self.channels) {
            for _ in 0..self.repeat {
                self.buffer.extend_from_slice(frame);
            }
        }
        self.flushed = false;
        Ok(())
    }

    fn available_frames(&self) -> usize {
        let frames = self.buffer.len() / self.channels;
        if self.flushed {
            frames
        } else {
            frames.saturating_sub(self.latency_frames)
        }
    }

    fn receive_samples(&mut self, buf: &mut [f32], max_frames: usize) -> Result<usize> {
        let frames = max_frames
            .min(self.available_frames())
            .min(buf.len() / self.channels);
        let n = frames * self.channels;
        buf[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.drain(..n);
        Ok(frames)
    }

    fn flush(&mut self) -> Result<()> {
        self.record(EngineCall::Flush);
        self.flushed = true;
        Ok(())
    }

    fn clear(&mut self) {
        self.record(EngineCall::Clear);
        self.buffer.clear();
        self.flushed = false;
    }

    fn dispose(&mut self) {
        self.record(EngineCall::Dispose);
        self.buffer = Vec::new();
    }
}

/// Source producing an increasing ramp, optionally limited to `total` samples.
pub struct RampSource {
    format: Format,
    next: f32,
    remaining: Option<usize>,
    pub reads: usize,
}

impl RampSource {
    pub fn endless(format: Format) -> Self {
        Self {
            format,
            next: 0.0,
            remaining: None,
            reads: 0,
        }
    }

    pub fn limited(format: Format, total: usize) -> Self {
        Self {
            remaining: Some(total),
            ..Self::endless(format)
        }
    }
}

impl AudioSource for RampSource {
    fn format(&self) -> Format {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        self.reads += 1;
        let n = match self.remaining {
            Some(rem) => buf.len().min(rem),
            None => buf.len(),
        };
        for s in &mut buf[..n] {
            *s = self.next;
            self.next += 1.0;
        }
        if let Some(rem) = self.remaining.as_mut() {
            *rem -= n;
        }
        Ok(n)
    }
}

/// Source that fails the test if it is ever pulled.
pub struct UntouchableSource {
    pub format: Format,
}

impl AudioSource for UntouchableSource {
    fn format(&self) -> Format {
        self.format
    }

    fn read(&mut self, _buf: &mut [f32]) -> Result<usize> {
        panic!("source must not be pulled");
    }
}

pub fn stereo_8k() -> Format {
    Format::new(8_000, 2).unwrap()
}

/// Interleaved sine test tone.
pub fn sine(format: Format, frames: usize, freq_hz: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(frames * format.channels);
    for i in 0..frames {
        let t = i as f32 / format.sample_rate as f32;
        let v = (2.0 * std::f32::consts::PI * freq_hz * t).sin() * 0.5;
        for _ in 0..format.channels {
            out.push(v);
        }
    }
    out
}
