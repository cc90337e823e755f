//! Anti-aliasing low-pass for the resample stage.
//!
//! A Butterworth cascade of RBJ biquads. Retuning only swaps coefficients, the delay
//! lines are kept, so the cutoff can follow a changing resample ratio without a gap.

use std::f64::consts::PI;

/// Filter order (two poles per section).
const ORDER: usize = 8;

/// Passband edge relative to the output Nyquist frequency.
const CUTOFF_FRACTION: f64 = 0.9;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Coeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct State {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

/// Multichannel low-pass whose cutoff tracks an output/input ratio.
pub struct AntiAliasFilter {
    channels: usize,
    q: Vec<f64>,
    coeffs: Vec<Coeffs>,
    /// `sections * channels`, section-major.
    state: Vec<State>,
    cutoff: f64,
}

impl AntiAliasFilter {
    pub fn new(ratio: f64, channels: usize) -> Self {
        let channels = channels.max(1);
        let q = butterworth_q(ORDER);
        let sections = q.len();
        let mut filter = Self {
            channels,
            q,
            coeffs: vec![Coeffs::default(); sections],
            state: vec![State::default(); sections * channels],
            cutoff: 0.0,
        };
        filter.set_ratio(ratio);
        filter
    }

    pub fn set_ratio(&mut self, ratio: f64) {
        let cutoff = cutoff_for_ratio(ratio);
        if cutoff == self.cutoff {
            return;
        }
        self.cutoff = cutoff;
        for (c, q) in self.coeffs.iter_mut().zip(&self.q) {
            *c = lowpass(cutoff, *q);
        }
    }

    /// Filter interleaved samples in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        let ch = self.channels;
        for frame in samples.chunks_exact_mut(ch) {
            for (c, sample) in frame.iter_mut().enumerate() {
                let mut x = *sample as f64;
                for (k, co) in self.coeffs.iter().enumerate() {
                    let s = &mut self.state[k * ch + c];
                    let y = co.b0 * x + co.b1 * s.x1 + co.b2 * s.x2 - co.a1 * s.y1 - co.a2 * s.y2;
                    s.x2 = s.x1;
                    s.x1 = x;
                    s.y2 = s.y1;
                    s.y1 = y;
                    x = y;
                }
                *sample = x as f32;
            }
        }
    }

    pub fn reset(&mut self) {
        self.state.fill(State::default());
    }
}

/// Cutoff (cycles per input sample) that keeps a resample by `ratio` alias-free.
pub fn cutoff_for_ratio(ratio: f64) -> f64 {
    0.5 * CUTOFF_FRACTION * ratio.clamp(f64::MIN_POSITIVE, 1.0)
}

fn butterworth_q(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|i| 1.0 / (2.0 * (PI / order as f64 * (i as f64 + 0.5)).sin()))
        .collect()
}

fn lowpass(freq: f64, q: f64) -> Coeffs {
    let omega = 2.0 * PI * freq;
    let (sn, cs) = omega.sin_cos();
    let alpha = sn / (2.0 * q);
    let a0 = 1.0 + alpha;
    Coeffs {
        b0: (1.0 - cs) / 2.0 / a0,
        b1: (1.0 - cs) / a0,
        b2: (1.0 - cs) / 2.0 / a0,
        a1: -2.0 * cs / a0,
        a2: (1.0 - alpha) / a0,
    }
}
