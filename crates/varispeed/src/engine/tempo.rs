//! WSOLA tempo stretcher.
//!
//! Cuts the input into fixed-length sequences, searches a small window for the offset
//! whose start best continues the previous sequence's tail, and crossfades the two over
//! the overlap region. Output duration scales by `1 / tempo` while pitch is preserved.

use crate::profile::is_unity_rate;

const MAX_FLUSH_ROUNDS: usize = 256;

/// Window sizes in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WsolaParams {
    pub sequence_ms: u32,
    pub seek_window_ms: u32,
    pub overlap_ms: u32,
}

impl Default for WsolaParams {
    fn default() -> Self {
        Self {
            sequence_ms: 40,
            seek_window_ms: 15,
            overlap_ms: 8,
        }
    }
}

/// Pitch-preserving tempo stage over interleaved `f32` frames.
pub struct TempoStretcher {
    channels: usize,
    sequence: usize,
    seek_window: usize,
    overlap: usize,
    tempo: f64,
    quick_seek: bool,
    input: Vec<f32>,
    /// Tail of the last emitted sequence, crossfaded into the next one.
    mid: Vec<f32>,
    primed: bool,
    skip_fract: f64,
    /// Input frames still to be skipped once they arrive.
    skip_debt: usize,
    /// Output frames the input fed so far should still yield.
    owed: f64,
}

impl TempoStretcher {
    pub fn new(sample_rate: u32, channels: usize, params: WsolaParams) -> Self {
        let frames = |ms: u32| (sample_rate as u64 * ms as u64 / 1_000) as usize;
        let channels = channels.max(1);
        let overlap = frames(params.overlap_ms).max(1);
        let sequence = frames(params.sequence_ms).max(2 * overlap);
        let seek_window = frames(params.seek_window_ms);
        Self {
            channels,
            sequence,
            seek_window,
            overlap,
            tempo: 1.0,
            quick_seek: false,
            input: Vec::new(),
            mid: vec![0.0; overlap * channels],
            primed: false,
            skip_fract: 0.0,
            skip_debt: 0,
            owed: 0.0,
        }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Non-positive or non-finite values are ignored.
    pub fn set_tempo(&mut self, tempo: f64) {
        if !tempo.is_finite() || tempo <= 0.0 {
            tracing::warn!(tempo, "ignoring invalid tempo");
            return;
        }
        self.tempo = tempo;
    }

    pub fn set_quick_seek(&mut self, enabled: bool) {
        self.quick_seek = enabled;
    }

    /// Input frames buffered but not yet consumed.
    pub fn buffered_frames(&self) -> usize {
        self.input.len() / self.channels
    }

    /// Append interleaved samples and emit every sequence that can be formed.
    pub fn put(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let whole = samples.len() - samples.len() % self.channels;
        self.input.extend_from_slice(&samples[..whole]);
        self.owed += (whole / self.channels) as f64 / self.tempo;
        self.process(out);
    }

    /// Emit the remaining buffered audio, padded and trimmed to the expected length.
    /// A second flush without new input emits nothing.
    pub fn flush(&mut self, out: &mut Vec<f32>) {
        let target = self.owed.round().max(0.0) as usize;
        if target == 0 {
            self.clear();
            return;
        }

        let needed = self.seek_window + self.sequence + self.overlap;
        let mut tail = Vec::with_capacity((target + self.sequence) * self.channels);
        let mut rounds = 0;
        while tail.len() / self.channels < target && rounds < MAX_FLUSH_ROUNDS {
            let missing = (needed + self.skip_debt)
                .saturating_sub(self.buffered_frames())
                .max(1);
            self.input.resize(self.input.len() + missing * self.channels, 0.0);
            self.process(&mut tail);
            rounds += 1;
        }

        let keep = target.min(tail.len() / self.channels) * self.channels;
        out.extend_from_slice(&tail[..keep]);
        self.clear();
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.mid.fill(0.0);
        self.primed = false;
        self.skip_fract = 0.0;
        self.skip_debt = 0;
        self.owed = 0.0;
    }

    fn process(&mut self, out: &mut Vec<f32>) {
        let ch = self.channels;
        let needed = self.seek_window + self.sequence + self.overlap;
        loop {
            if self.skip_debt > 0 {
                let n = self.skip_debt.min(self.buffered_frames());
                self.input.drain(..n * ch);
                self.skip_debt -= n;
                if self.skip_debt > 0 {
                    break;
                }
            }
            if self.buffered_frames() < needed {
                break;
            }

            let offset = if !self.primed || is_unity_rate(self.tempo as f32) {
                0
            } else {
                self.best_offset()
            };
            let seg = &self.input[offset * ch..(offset + self.sequence + self.overlap) * ch];
            let ov = self.overlap * ch;

            if self.primed {
                for (i, (m, s)) in self.mid.iter().zip(&seg[..ov]).enumerate() {
                    let w = (i / ch) as f32 / self.overlap as f32;
                    out.push(m * (1.0 - w) + s * w);
                }
            } else {
                out.extend_from_slice(&seg[..ov]);
            }
            out.extend_from_slice(&seg[ov..self.sequence * ch]);
            self.mid
                .copy_from_slice(&seg[self.sequence * ch..(self.sequence + self.overlap) * ch]);
            self.primed = true;
            self.owed -= self.sequence as f64;

            self.skip_fract += self.sequence as f64 * self.tempo;
            let skip = self.skip_fract.floor();
            self.skip_fract -= skip;
            self.skip_debt = skip as usize;
        }
    }

    fn best_offset(&self) -> usize {
        if self.quick_seek {
            let coarse = (0..=self.seek_window).step_by(4);
            let rough = self.best_of(coarse);
            let lo = rough.saturating_sub(3);
            let hi = (rough + 3).min(self.seek_window);
            self.best_of(lo..=hi)
        } else {
            self.best_of(0..=self.seek_window)
        }
    }

    fn best_of(&self, offsets: impl Iterator<Item = usize>) -> usize {
        let ch = self.channels;
        let len = self.overlap * ch;
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for offset in offsets {
            let cand = &self.input[offset * ch..offset * ch + len];
            let mut corr = 0.0f64;
            let mut energy = 0.0f64;
            for (m, c) in self.mid.iter().zip(cand) {
                corr += (*m as f64) * (*c as f64);
                energy += (*c as f64) * (*c as f64);
            }
            let score = corr / (energy + 1e-12).sqrt();
            if score > best_score {
                best_score = score;
                best = offset;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::test_support::sine;

    fn run(stretcher: &mut TempoStretcher, input: &[f32], block: usize) -> Vec<f32> {
        let mut out = Vec::new();
        for chunk in input.chunks(block) {
            stretcher.put(chunk, &mut out);
        }
        stretcher.flush(&mut out);
        out
    }

    #[test]
    fn unity_tempo_is_pass_through() {
        let fmt = Format::new(8_000, 2).unwrap();
        let input = sine(fmt, 4_000, 220.0);
        let mut st = TempoStretcher::new(8_000, 2, WsolaParams::default());
        let out = run(&mut st, &input, 333 * 2);

        assert_eq!(out.len(), input.len());
        for (a, b) in out.iter().zip(&input) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn tempo_within_epsilon_of_unity_is_pass_through() {
        let fmt = Format::new(8_000, 1).unwrap();
        let input = sine(fmt, 4_000, 250.0);
        let mut st = TempoStretcher::new(8_000, 1, WsolaParams::default());
        st.set_tempo(1.0 + 1e-9);
        let out = run(&mut st, &input, 500);

        assert_eq!(out.len(), input.len());
        for (a, b) in out.iter().zip(&input) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn faster_tempo_shortens_output() {
        let fmt = Format::new(8_000, 1).unwrap();
        let input = sine(fmt, 8_000, 300.0);
        let mut st = TempoStretcher::new(8_000, 1, WsolaParams::default());
        st.set_tempo(2.0);
        let out = run(&mut st, &input, 800);
        assert!((out.len() as i64 - 4_000).abs() <= 1, "got {}", out.len());
    }

    #[test]
    fn slower_tempo_lengthens_output() {
        let fmt = Format::new(8_000, 1).unwrap();
        let input = sine(fmt, 8_000, 300.0);
        let mut st = TempoStretcher::new(8_000, 1, WsolaParams::default());
        st.set_tempo(0.5);
        let out = run(&mut st, &input, 800);
        assert!((out.len() as i64 - 16_000).abs() <= 1, "got {}", out.len());
    }

    #[test]
    fn quick_seek_keeps_length() {
        let fmt = Format::new(8_000, 2).unwrap();
        let input = sine(fmt, 6_000, 440.0);

        let mut full = TempoStretcher::new(8_000, 2, WsolaParams::default());
        full.set_tempo(1.5);
        let mut quick = TempoStretcher::new(8_000, 2, WsolaParams::default());
        quick.set_tempo(1.5);
        quick.set_quick_seek(true);

        assert_eq!(
            run(&mut full, &input, 1_000).len(),
            run(&mut quick, &input, 1_000).len()
        );
    }

    #[test]
    fn second_flush_emits_nothing() {
        let fmt = Format::new(8_000, 1).unwrap();
        let input = sine(fmt, 1_000, 300.0);
        let mut st = TempoStretcher::new(8_000, 1, WsolaParams::default());
        let mut out = Vec::new();
        st.put(&input, &mut out);
        st.flush(&mut out);
        let len = out.len();
        st.flush(&mut out);
        assert_eq!(out.len(), len);
    }

    #[test]
    fn clear_drops_buffered_input() {
        let fmt = Format::new(8_000, 1).unwrap();
        let input = sine(fmt, 200, 300.0);
        let mut st = TempoStretcher::new(8_000, 1, WsolaParams::default());
        let mut out = Vec::new();
        st.put(&input, &mut out);
        assert!(out.is_empty());
        assert_eq!(st.buffered_frames(), 200);

        st.clear();
        st.flush(&mut out);
        assert!(out.is_empty());
        assert_eq!(st.buffered_frames(), 0);
    }

    #[test]
    fn invalid_tempo_is_ignored() {
        let mut st = TempoStretcher::new(8_000, 1, WsolaParams::default());
        st.set_tempo(0.0);
        st.set_tempo(f64::NAN);
        assert_eq!(st.tempo(), 1.0);
    }
}
