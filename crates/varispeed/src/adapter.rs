//! Variable-speed source adapter.
//!
//! [`VarispeedSource`] sits between an upstream [`AudioSource`] and a consumer that
//! pulls fixed-size blocks. It reconciles three cadences:
//! - the consumer's block size (whatever `read` is called with),
//! - the source's fixed read-ahead chunk (`read_duration_ms` worth of samples),
//! - the engine's rate-dependent output volume.
//!
//! ## Pull loop
//! Each `read` alternates between feeding (one source chunk into the engine, only when
//! the engine has nothing ready) and draining (engine output into the caller's
//! buffer) until the request is satisfied or both source and engine are exhausted.
//!
//! ## Buffers
//! Both buffers are allocated once at construction. The engine-output buffer holds
//! `ceil(1 / min_playback_rate)` read-ahead chunks, and each drain is capped at its
//! capacity, so no drain can overflow it regardless of the consumer's block size.

use std::sync::Arc;

use anyhow::{Result, bail};
use crossbeam_channel::Receiver;

use crate::config::VarispeedConfig;
use crate::control::{self, ControlCommand, ControlShared, Lifecycle, VarispeedControl};
use crate::engine::StretchEngine;
use crate::format::Format;
use crate::profile::{
    StretchProfile, UNITY_RATE, is_silent_rate, is_unity_rate, rates_equal, sanitize_rate,
};
use crate::source::AudioSource;

/// Pull-based adapter adding live speed/tempo control to an [`AudioSource`].
///
/// Owns its engine exclusively. Implements [`AudioSource`] itself, so it can be chained
/// like any other source.
pub struct VarispeedSource<S: AudioSource, E: StretchEngine> {
    source: S,
    engine: E,
    format: Format,
    config: VarispeedConfig,
    read_ahead: Vec<f32>,
    engine_out: Vec<f32>,
    playback_rate: f32,
    /// Last multiplier pushed into the engine. Differs from `playback_rate` only while
    /// the silence sentinel is active.
    engine_rate: f32,
    profile: StretchProfile,
    control: VarispeedControl,
    commands: Receiver<ControlCommand>,
    shared: Arc<ControlShared>,
    end_logged: bool,
}

impl<S: AudioSource, E: StretchEngine> VarispeedSource<S, E> {
    /// Wrap `source`, configuring `engine` for the source format and applying `profile`.
    pub fn new(
        source: S,
        mut engine: E,
        profile: StretchProfile,
        config: VarispeedConfig,
    ) -> Result<Self> {
        config.validate()?;
        let src_format = source.format();
        let format = Format::new(src_format.sample_rate, src_format.channels)?;

        engine.configure(format.sample_rate, format.channels)?;

        let read_ahead_len = format.samples_for_ms(config.read_duration_ms);
        let engine_out_len = read_ahead_len * config.expansion_factor();

        let (control, commands, shared) = control::channel(profile, config.min_playback_rate);

        let mut this = Self {
            source,
            engine,
            format,
            read_ahead: vec![0.0; read_ahead_len],
            engine_out: vec![0.0; engine_out_len],
            playback_rate: UNITY_RATE,
            engine_rate: UNITY_RATE,
            profile,
            control,
            commands,
            shared,
            end_logged: false,
            config,
        };
        this.apply_profile(None, profile);

        tracing::info!(
            rate_hz = format.sample_rate,
            channels = format.channels,
            read_ahead_samples = read_ahead_len,
            engine_out_samples = engine_out_len,
            tempo = profile.use_tempo,
            "varispeed source ready"
        );
        Ok(this)
    }

    /// Handle for changing rate/profile/position from another thread.
    pub fn control(&self) -> VarispeedControl {
        self.control.clone()
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate
    }

    pub fn profile(&self) -> StretchProfile {
        self.profile
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// Read-ahead buffer capacity in samples.
    pub fn read_ahead_capacity(&self) -> usize {
        self.read_ahead.len()
    }

    /// Engine-output buffer capacity in samples.
    pub fn engine_output_capacity(&self) -> usize {
        self.engine_out.len()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Switch profile, keeping elapsed musical time continuous across a rate/tempo
    /// mode change.
    pub fn set_profile(&mut self, profile: StretchProfile) {
        if self.lifecycle() == Lifecycle::Disposed {
            tracing::debug!("set_profile ignored: engine disposed");
            return;
        }
        let previous = self.profile;
        self.apply_profile(Some(previous), profile);
        self.profile = profile;
        self.shared.mirror_profile(profile);
    }

    /// Change the playback rate. `0.0` plays silence without advancing the source.
    ///
    /// Values within [`crate::RATE_EPSILON`] of the current rate are ignored.
    pub fn set_playback_rate(&mut self, value: f32) -> Result<()> {
        let value = sanitize_rate(value, self.config.min_playback_rate)?;
        if rates_equal(self.playback_rate, value) {
            return Ok(());
        }
        if self.lifecycle() == Lifecycle::Disposed {
            tracing::debug!("set_playback_rate ignored: engine disposed");
            return Ok(());
        }
        if !is_silent_rate(value) {
            self.push_rate(value);
        }
        self.playback_rate = value;
        self.shared.mirror_rate(value);
        Ok(())
    }

    /// Discard buffered engine state on the next pull.
    pub fn reposition(&self) {
        self.control.reposition();
    }

    /// Release the engine now. Later pulls report end of stream.
    pub fn dispose(&mut self) {
        if self.lifecycle() == Lifecycle::Disposed {
            return;
        }
        self.engine.dispose();
        self.shared.mark_disposed();
        tracing::info!("varispeed engine disposed");
    }

    fn apply_profile(&mut self, previous: Option<StretchProfile>, next: StretchProfile) {
        if let Some(prev) = previous {
            let rate = self.engine_rate;
            if !is_unity_rate(rate) && prev.use_tempo != next.use_tempo {
                if next.use_tempo {
                    self.engine.set_rate(UNITY_RATE);
                    self.engine.set_pitch_octaves(0.0);
                    self.engine.set_tempo(rate);
                } else {
                    self.engine.set_tempo(UNITY_RATE);
                    self.engine.set_rate(rate);
                }
                tracing::debug!(rate, tempo = next.use_tempo, "stretch mode handoff");
            }
        }
        self.engine.set_anti_aliasing(next.use_anti_aliasing);
        self.engine.set_quick_seek(next.use_quick_seek);
    }

    fn push_rate(&mut self, value: f32) {
        if self.profile.use_tempo {
            self.engine.set_tempo(value);
        } else {
            self.engine.set_rate(value);
        }
        self.engine_rate = value;
    }

    fn apply_commands(&mut self) -> Result<()> {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                ControlCommand::SetPlaybackRate(rate) => self.set_playback_rate(rate)?,
                ControlCommand::SetProfile(profile) => self.set_profile(profile),
            }
        }
        Ok(())
    }

    /// Feed/drain until `buf` is full or source and engine are both exhausted.
    fn fill(&mut self, buf: &mut [f32]) -> Result<usize> {
        let channels = self.format.channels;
        let requested = buf.len();
        let out_capacity_frames = self.engine_out.len() / channels;

        let mut produced = 0usize;
        let mut end_of_source = false;
        let mut fruitless = 0usize;

        while produced < requested {
            if self.engine.available_frames() == 0 {
                let read = self.source.read(&mut self.read_ahead)?;
                if read > 0 {
                    self.engine
                        .put_samples(&self.read_ahead[..read], read / channels)?;
                } else {
                    end_of_source = true;
                    self.engine.flush()?;
                }
            }

            let desired_frames = ((requested - produced) / channels).min(out_capacity_frames);
            let frames = self
                .engine
                .receive_samples(&mut self.engine_out, desired_frames)?
                .min(desired_frames);
            let received = frames * channels;

            buf[produced..produced + received].copy_from_slice(&self.engine_out[..received]);
            produced += received;

            if received == 0 {
                if end_of_source {
                    break;
                }
                fruitless += 1;
                if fruitless >= self.config.stall_limit {
                    bail!(
                        "stretch engine produced no output after {fruitless} consecutive feeds"
                    );
                }
            } else {
                fruitless = 0;
            }
        }

        Ok(produced)
    }
}

impl<S: AudioSource, E: StretchEngine> AudioSource for VarispeedSource<S, E> {
    fn format(&self) -> Format {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        self.apply_commands()?;
        match self.lifecycle() {
            Lifecycle::Active => {}
            Lifecycle::Stopping => {
                self.dispose();
                return Ok(0);
            }
            Lifecycle::Disposed => return Ok(0),
        }

        if is_silent_rate(self.playback_rate) {
            buf.fill(0.0);
            return Ok(buf.len());
        }

        let channels = self.format.channels;
        if buf.len() % channels != 0 {
            bail!(
                "read of {} samples is not a whole number of {channels}-channel frames",
                buf.len()
            );
        }

        if self.shared.take_reposition() {
            self.engine.clear();
            tracing::debug!("reposition: engine state cleared");
        }

        let produced = self.fill(buf)?;
        if produced < buf.len() && !self.end_logged {
            self.end_logged = true;
            tracing::info!(last_read = produced, "varispeed end of stream");
        }
        Ok(produced)
    }
}

impl<S: AudioSource, E: StretchEngine> Drop for VarispeedSource<S, E> {
    fn drop(&mut self) {
        self.dispose();
    }
}
