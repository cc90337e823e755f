//! Streaming resample stage.
//!
//! [`StreamResampler`] wraps Rubato's asynchronous sinc resampler behind a push API that
//! accepts arbitrary block sizes, carries a variable ratio, and trims its own latency so
//! output length tracks `input * ratio`. The sinc table is always full band; at
//! [`ResampleQuality::High`] an [`AntiAliasFilter`] in front of it follows the ratio,
//! so ratio changes ramp without rebuilding. It serves two roles:
//! - the rate (transposition) stage of [`crate::NativeEngine`],
//! - [`ResampleSource`], converting a decoded file to the output device rate.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::filter::AntiAliasFilter;
use crate::format::Format;
use crate::source::AudioSource;

/// Input chunk size in frames used by the steady-state loop.
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

/// Ratio headroom before the resampler has to be rebuilt.
const MAX_RELATIVE_RATIO: f64 = 10.0;

const MAX_FLUSH_ROUNDS: usize = 64;

/// Sinc table quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResampleQuality {
    /// Long windowed sinc plus an anti-aliasing low-pass.
    High,
    /// Short sinc, linear interpolation, no low-pass.
    Fast,
}

impl ResampleQuality {
    fn params(self) -> SincInterpolationParameters {
        match self {
            ResampleQuality::High => {
                let sinc_len = 128;
                let window = WindowFunction::BlackmanHarris2;
                SincInterpolationParameters {
                    sinc_len,
                    f_cutoff: calculate_cutoff(sinc_len, window),
                    interpolation: SincInterpolationType::Cubic,
                    oversampling_factor: 256,
                    window,
                }
            }
            ResampleQuality::Fast => SincInterpolationParameters {
                sinc_len: 32,
                f_cutoff: 1.0,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 64,
                window: WindowFunction::Hann,
            },
        }
    }
}

/// Push-driven resampler with a variable output/input ratio.
pub struct StreamResampler {
    resampler: Box<dyn Resampler<f32> + Send>,
    channels: usize,
    chunk_frames: usize,
    ratio: f64,
    quality: ResampleQuality,
    anti_alias: Option<AntiAliasFilter>,
    pending: Vec<f32>,
    /// Output of a replaced resampler, emitted ahead of anything new.
    carry: Vec<f32>,
    out_buf: Vec<f32>,
    /// Leading output frames still to drop (filter delay).
    delay: usize,
    /// Output frames the input pushed so far should still yield.
    owed: f64,
}

impl StreamResampler {
    pub fn new(
        ratio: f64,
        channels: usize,
        chunk_frames: usize,
        quality: ResampleQuality,
    ) -> Result<Self> {
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let resampler = build(ratio, quality, chunk_frames, channels)?;
        let out_buf = vec![0.0; resampler.output_frames_max() * channels];
        let delay = resampler.output_delay();
        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            ratio,
            quality,
            anti_alias: anti_alias_for(quality, ratio, channels),
            pending: Vec::with_capacity(chunk_frames * channels),
            carry: Vec::new(),
            out_buf,
            delay,
            owed: 0.0,
        })
    }

    /// Output/input frame ratio.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn quality(&self) -> ResampleQuality {
        self.quality
    }

    pub fn set_ratio(&mut self, ratio: f64) -> Result<()> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(anyhow!("invalid resample ratio {ratio}"));
        }
        if ratio == self.ratio {
            return Ok(());
        }
        if let Some(filter) = self.anti_alias.as_mut() {
            filter.set_ratio(ratio);
        }
        if self.resampler.set_resample_ratio(ratio, true).is_err() {
            self.rebuild(ratio, self.quality)?;
        }
        self.ratio = ratio;
        Ok(())
    }

    pub fn set_quality(&mut self, quality: ResampleQuality) -> Result<()> {
        if quality == self.quality {
            return Ok(());
        }
        self.rebuild(self.ratio, quality)?;
        self.quality = quality;
        self.anti_alias = anti_alias_for(quality, self.ratio, self.channels);
        Ok(())
    }

    /// Append interleaved input and resample every complete chunk into `out`.
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        out.append(&mut self.carry);
        let ch = self.channels;
        let whole = input.len() - input.len() % ch;
        let start = self.pending.len();
        self.pending.extend_from_slice(&input[..whole]);
        if let Some(filter) = self.anti_alias.as_mut() {
            filter.process(&mut self.pending[start..]);
        }
        self.owed += (whole / ch) as f64 * self.ratio;

        let chunk_len = self.chunk_frames * ch;
        while self.pending.len() >= chunk_len {
            let n = run_chunk(
                self.resampler.as_mut(),
                &self.pending[..chunk_len],
                None,
                ch,
                &mut self.out_buf,
            )?;
            self.pending.drain(..chunk_len);
            self.emit(n, out);
        }
        Ok(())
    }

    /// Resample whatever is pending plus the filter tail, trimmed to the expected
    /// length, then reset. A second flush without new input emits nothing.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        out.append(&mut self.carry);
        self.drain_tail(out)?;
        self.reset();
        Ok(())
    }

    /// Drop pending input and filter state.
    pub fn reset(&mut self) {
        self.resampler.reset();
        // rubato's reset returns to the construction ratio
        if let Err(e) = self.resampler.set_resample_ratio(self.ratio, false) {
            tracing::warn!("resampler ratio not restored after reset: {e}");
        }
        if let Some(filter) = self.anti_alias.as_mut() {
            filter.reset();
        }
        self.pending.clear();
        self.carry.clear();
        self.delay = self.resampler.output_delay();
        self.owed = 0.0;
    }

    /// Emit everything owed for the input so far, padding the filter with silence.
    fn drain_tail(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let ch = self.channels;
        let target = self.owed.round().max(0.0) as usize;
        if target == 0 {
            self.pending.clear();
            return Ok(());
        }

        let mut tail = Vec::new();
        let mut chunk = vec![0.0f32; self.chunk_frames * ch];
        let pending_frames = self.pending.len() / ch;
        if pending_frames > 0 {
            chunk[..self.pending.len()].copy_from_slice(&self.pending);
            let n = run_chunk(
                self.resampler.as_mut(),
                &chunk,
                Some(pending_frames),
                ch,
                &mut self.out_buf,
            )?;
            self.emit(n, &mut tail);
            chunk.fill(0.0);
        }

        let mut rounds = 0;
        while tail.len() / ch < target && rounds < MAX_FLUSH_ROUNDS {
            let n = run_chunk(self.resampler.as_mut(), &chunk, None, ch, &mut self.out_buf)?;
            self.emit(n, &mut tail);
            rounds += 1;
        }

        let keep = target.min(tail.len() / ch) * ch;
        out.extend_from_slice(&tail[..keep]);
        self.pending.clear();
        self.owed = 0.0;
        Ok(())
    }

    /// Replace the resampler. Input already pushed is rendered by the old one first.
    fn rebuild(&mut self, ratio: f64, quality: ResampleQuality) -> Result<()> {
        let resampler = build(ratio, quality, self.chunk_frames, self.channels)?;
        let mut carry = std::mem::take(&mut self.carry);
        self.drain_tail(&mut carry)?;
        self.carry = carry;

        self.out_buf
            .resize(resampler.output_frames_max() * self.channels, 0.0);
        self.delay = resampler.output_delay();
        self.resampler = resampler;
        tracing::debug!(ratio, ?quality, "resampler rebuilt");
        Ok(())
    }

    fn emit(&mut self, frames: usize, out: &mut Vec<f32>) {
        let skip = self.delay.min(frames);
        self.delay -= skip;
        out.extend_from_slice(&self.out_buf[skip * self.channels..frames * self.channels]);
        self.owed -= (frames - skip) as f64;
    }
}

fn build(
    ratio: f64,
    quality: ResampleQuality,
    chunk_frames: usize,
    channels: usize,
) -> Result<Box<dyn Resampler<f32> + Send>> {
    let mut params = quality.params();
    // rubato scales the cutoff by a starting ratio below 1; keep the table full band
    if ratio < 1.0 {
        params.f_cutoff /= ratio as f32;
    }
    let resampler = Async::<f32>::new_sinc(
        ratio,
        MAX_RELATIVE_RATIO,
        &params,
        chunk_frames,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| anyhow!("resampler init error: {e}"))?;
    Ok(Box::new(resampler))
}

fn anti_alias_for(
    quality: ResampleQuality,
    ratio: f64,
    channels: usize,
) -> Option<AntiAliasFilter> {
    match quality {
        ResampleQuality::High => Some(AntiAliasFilter::new(ratio, channels)),
        ResampleQuality::Fast => None,
    }
}

fn run_chunk(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    partial_len: Option<usize>,
    channels: usize,
    out_buf: &mut [f32],
) -> Result<usize> {
    let in_frames = input.len() / channels;
    let input_adapter = InterleavedSlice::new(input, channels, in_frames)
        .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
    let out_frames = out_buf.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(out_buf, channels, out_frames)
        .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };
    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| anyhow!("resampler process error: {e}"))?;
    Ok(nbr_out)
}

/// [`AudioSource`] resampling another source to a fixed target rate.
pub struct ResampleSource<S: AudioSource> {
    source: S,
    resampler: StreamResampler,
    format: Format,
    scratch: Vec<f32>,
    ready: Vec<f32>,
    eof: bool,
}

impl<S: AudioSource> ResampleSource<S> {
    pub fn new(source: S, target_rate: u32, quality: ResampleQuality) -> Result<Self> {
        let src = source.format();
        let format = Format::new(target_rate, src.channels)?;
        let ratio = target_rate as f64 / src.sample_rate as f64;
        let resampler =
            StreamResampler::new(ratio, src.channels, DEFAULT_CHUNK_FRAMES, quality)?;
        tracing::info!(
            from_hz = src.sample_rate,
            to_hz = target_rate,
            ?quality,
            "resampling source"
        );
        Ok(Self {
            source,
            resampler,
            format,
            scratch: vec![0.0; DEFAULT_CHUNK_FRAMES * src.channels],
            ready: Vec::new(),
            eof: false,
        })
    }

}

impl<S: AudioSource> AudioSource for ResampleSource<S> {
    fn format(&self) -> Format {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        while self.ready.len() < buf.len() && !self.eof {
            let n = self.source.read(&mut self.scratch)?;
            if n == 0 {
                self.resampler.flush(&mut self.ready)?;
                self.eof = true;
            } else {
                self.resampler.push(&self.scratch[..n], &mut self.ready)?;
            }
        }
        let n = buf.len().min(self.ready.len());
        buf[..n].copy_from_slice(&self.ready[..n]);
        self.ready.drain(..n);
        Ok(n)
    }
}
