//! Stretch profile and playback-rate rules.
//!
//! All "is this rate zero / unchanged / unity" decisions go through the helpers here so
//! the adapter and the control handle agree on the same tolerance.

use anyhow::{Result, bail};

/// Tolerance for rate comparisons. Rates at or below this are the silence sentinel.
pub const RATE_EPSILON: f32 = f32::EPSILON;

/// Default playback rate (normal speed).
pub const UNITY_RATE: f32 = 1.0;

/// How the engine interprets the playback-rate multiplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StretchMode {
    /// Duration and pitch both change (tape-style varispeed).
    #[default]
    Rate,
    /// Duration changes, pitch is preserved.
    Tempo,
}

/// Engine behaviour selected by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct StretchProfile {
    pub use_tempo: bool,
    pub use_anti_aliasing: bool,
    pub use_quick_seek: bool,
}

impl StretchProfile {
    pub fn new(use_tempo: bool, use_anti_aliasing: bool) -> Self {
        Self {
            use_tempo,
            use_anti_aliasing,
            use_quick_seek: false,
        }
    }

    pub fn with_quick_seek(mut self, use_quick_seek: bool) -> Self {
        self.use_quick_seek = use_quick_seek;
        self
    }

    pub fn mode(&self) -> StretchMode {
        if self.use_tempo {
            StretchMode::Tempo
        } else {
            StretchMode::Rate
        }
    }

    /// Pack into three bits so a control handle can mirror it in an atomic.
    pub(crate) fn to_bits(self) -> u8 {
        (self.use_tempo as u8) | (self.use_anti_aliasing as u8) << 1 | (self.use_quick_seek as u8) << 2
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            use_tempo: bits & 0b001 != 0,
            use_anti_aliasing: bits & 0b010 != 0,
            use_quick_seek: bits & 0b100 != 0,
        }
    }
}

impl From<StretchMode> for StretchProfile {
    fn from(mode: StretchMode) -> Self {
        StretchProfile::new(mode == StretchMode::Tempo, false)
    }
}

/// `true` when `rate` means "play silence, do not advance".
#[inline]
pub fn is_silent_rate(rate: f32) -> bool {
    rate <= RATE_EPSILON
}

/// `true` when `a` and `b` are indistinguishable for engine purposes.
#[inline]
pub fn rates_equal(a: f32, b: f32) -> bool {
    (a - b).abs() <= RATE_EPSILON
}

#[inline]
pub fn is_unity_rate(rate: f32) -> bool {
    rates_equal(rate, UNITY_RATE)
}

/// Validate a requested rate at the mutation boundary.
///
/// - NaN, infinite and negative values are rejected.
/// - Values at or below [`RATE_EPSILON`] are returned unchanged (silence sentinel).
/// - Other values below `min_rate` are clamped up to `min_rate`.
pub fn sanitize_rate(value: f32, min_rate: f32) -> Result<f32> {
    if !value.is_finite() {
        bail!("playback rate must be finite, got {value}");
    }
    if value < 0.0 {
        bail!("playback rate must not be negative, got {value}");
    }
    if is_silent_rate(value) {
        return Ok(value);
    }
    if value < min_rate {
        tracing::debug!(requested = value, clamped = min_rate, "playback rate clamped");
        return Ok(min_rate);
    }
    Ok(value)
}
