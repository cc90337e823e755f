use anyhow::{Result, bail};

use crate::profile::RATE_EPSILON;

/// Buffer sizing and guard parameters for a [`crate::VarispeedSource`].
#[derive(Clone, Debug)]
pub struct VarispeedConfig {
    /// Duration of one source read (read-ahead buffer size), in milliseconds.
    pub read_duration_ms: u32,
    /// Slowest supported playback rate. Sizes the engine-output buffer and is the floor
    /// non-silent rates are clamped to.
    pub min_playback_rate: f32,
    /// Consecutive feed cycles without engine output tolerated before a read fails.
    pub stall_limit: usize,
}

impl Default for VarispeedConfig {
    /// 100 ms source reads, down to 0.1x.
    fn default() -> Self {
        Self {
            read_duration_ms: 100,
            min_playback_rate: 0.1,
            stall_limit: 64,
        }
    }
}

impl VarispeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.read_duration_ms == 0 {
            bail!("read duration must be at least 1 ms");
        }
        if !self.min_playback_rate.is_finite()
            || self.min_playback_rate <= RATE_EPSILON
            || self.min_playback_rate > 1.0
        {
            bail!(
                "minimum playback rate must be in (0, 1], got {}",
                self.min_playback_rate
            );
        }
        if self.stall_limit == 0 {
            bail!("stall limit must be at least 1");
        }
        Ok(())
    }

    /// Worst-case engine output per unit of input: `ceil(1 / min_playback_rate)`.
    pub fn expansion_factor(&self) -> usize {
        ((1.0 / self.min_playback_rate as f64).ceil() as usize).max(1)
    }
}
