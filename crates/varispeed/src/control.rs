//! Control surface for a running [`crate::VarispeedSource`].
//!
//! The adapter lives on the audio pull thread. Everything a controller (UI, timer, CLI)
//! needs goes through [`VarispeedControl`], which is cheap to clone and safe to use
//! from any thread:
//!
//! - rate and profile changes are queued as [`ControlCommand`]s and applied by the
//!   adapter at the top of its next `read`, so the engine is only ever touched by the
//!   pull thread. The queue is bounded; a full queue means nobody is pulling, and
//!   further changes are refused;
//! - reposition is a single atomic flag, consumed by the next non-silent `read`;
//! - stop moves the shared lifecycle to [`Lifecycle::Stopping`]; the adapter disposes
//!   the engine on its next `read` and reports end of stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::profile::{StretchProfile, UNITY_RATE, sanitize_rate};

/// Commands that may wait for the next pull.
pub const COMMAND_QUEUE_DEPTH: usize = 32;

/// Lock-free `f32` cell.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub const fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Adapter lifecycle. Only moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Pulls are served normally.
    Active = 0,
    /// Stop requested; the next pull disposes the engine.
    Stopping = 1,
    /// Engine released; pulls report end of stream.
    Disposed = 2,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::Active,
            1 => Lifecycle::Stopping,
            _ => Lifecycle::Disposed,
        }
    }
}

/// Mutations queued for the pull thread.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlCommand {
    SetPlaybackRate(f32),
    SetProfile(StretchProfile),
}

/// State shared between the adapter and its control handles.
#[derive(Debug)]
pub(crate) struct ControlShared {
    reposition: AtomicBool,
    lifecycle: AtomicU8,
    playback_rate: AtomicF32,
    profile: AtomicU8,
    min_playback_rate: f32,
}

impl ControlShared {
    pub(crate) fn new(profile: StretchProfile, min_playback_rate: f32) -> Self {
        Self {
            reposition: AtomicBool::new(false),
            lifecycle: AtomicU8::new(Lifecycle::Active as u8),
            playback_rate: AtomicF32::new(UNITY_RATE),
            profile: AtomicU8::new(profile.to_bits()),
            min_playback_rate,
        }
    }

    /// Consume a pending reposition request.
    pub(crate) fn take_reposition(&self) -> bool {
        self.reposition.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub(crate) fn mark_disposed(&self) {
        self.lifecycle
            .store(Lifecycle::Disposed as u8, Ordering::Release);
    }

    pub(crate) fn mirror_rate(&self, rate: f32) {
        self.playback_rate.store(rate);
    }

    pub(crate) fn mirror_profile(&self, profile: StretchProfile) {
        self.profile.store(profile.to_bits(), Ordering::Relaxed);
    }
}

/// Thread-safe handle for changing rate, profile and position of a running adapter.
#[derive(Clone, Debug)]
pub struct VarispeedControl {
    tx: Sender<ControlCommand>,
    shared: Arc<ControlShared>,
}

impl VarispeedControl {
    pub(crate) fn new(tx: Sender<ControlCommand>, shared: Arc<ControlShared>) -> Self {
        Self { tx, shared }
    }

    /// Request a new playback rate.
    ///
    /// Invalid values (NaN, infinite, negative) are rejected here and never reach the
    /// adapter. `0.0` plays silence without advancing the source.
    pub fn set_playback_rate(&self, value: f32) -> Result<()> {
        let value = sanitize_rate(value, self.shared.min_playback_rate)?;
        self.send(ControlCommand::SetPlaybackRate(value))?;
        self.shared.mirror_rate(value);
        Ok(())
    }

    /// Last requested playback rate.
    pub fn playback_rate(&self) -> f32 {
        self.shared.playback_rate.load()
    }

    pub fn set_profile(&self, profile: StretchProfile) -> Result<()> {
        self.send(ControlCommand::SetProfile(profile))?;
        self.shared.mirror_profile(profile);
        Ok(())
    }

    /// Last requested profile.
    pub fn profile(&self) -> StretchProfile {
        StretchProfile::from_bits(self.shared.profile.load(Ordering::Relaxed))
    }

    /// Signal that the source position jumped; buffered engine state is discarded on
    /// the next pull.
    pub fn reposition(&self) {
        self.shared.reposition.store(true, Ordering::Release);
    }

    /// Ask the adapter to release its engine. Takes effect on the next pull.
    pub fn stop(&self) {
        let _ = self.shared.lifecycle.compare_exchange(
            Lifecycle::Active as u8,
            Lifecycle::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    fn send(&self, cmd: ControlCommand) -> Result<()> {
        if !self.is_active() {
            bail!("playback session is no longer active");
        }
        self.tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => {
                anyhow!("control queue full: playback is not consuming audio")
            }
            TrySendError::Disconnected(_) => anyhow!("playback session has been dropped"),
        })
    }
}

/// Build the command channel plus the shared state for a new adapter.
pub(crate) fn channel(
    profile: StretchProfile,
    min_playback_rate: f32,
) -> (VarispeedControl, Receiver<ControlCommand>, Arc<ControlShared>) {
    let (tx, rx) = crossbeam_channel::bounded(COMMAND_QUEUE_DEPTH);
    let shared = Arc::new(ControlShared::new(profile, min_playback_rate));
    (VarispeedControl::new(tx, shared.clone()), rx, shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_f32_stores_bits() {
        let cell = AtomicF32::new(1.0);
        assert_eq!(cell.load(), 1.0);
        cell.store(0.25);
        assert_eq!(cell.load(), 0.25);
    }

    #[test]
    fn commands_are_queued_in_order() {
        let (control, rx, _shared) = channel(StretchProfile::default(), 0.1);
        control.set_playback_rate(1.5).unwrap();
        control
            .set_profile(StretchProfile::new(true, true))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), ControlCommand::SetPlaybackRate(1.5));
        assert_eq!(
            rx.try_recv().unwrap(),
            ControlCommand::SetProfile(StretchProfile::new(true, true))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn invalid_rate_is_rejected_before_queueing() {
        let (control, rx, _shared) = channel(StretchProfile::default(), 0.1);
        assert!(control.set_playback_rate(-2.0).is_err());
        assert!(control.set_playback_rate(f32::NAN).is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(control.playback_rate(), 1.0);
    }

    #[test]
    fn slow_rate_is_clamped_and_mirrored() {
        let (control, rx, _shared) = channel(StretchProfile::default(), 0.1);
        control.set_playback_rate(0.01).unwrap();
        assert_eq!(control.playback_rate(), 0.1);
        assert_eq!(rx.try_recv().unwrap(), ControlCommand::SetPlaybackRate(0.1));
    }

    #[test]
    fn mirrors_profile() {
        let (control, _rx, _shared) = channel(StretchProfile::default(), 0.1);
        let p = StretchProfile::new(true, false).with_quick_seek(true);
        control.set_profile(p).unwrap();
        assert_eq!(control.profile(), p);
    }

    #[test]
    fn reposition_flag_is_consumed_once() {
        let (control, _rx, shared) = channel(StretchProfile::default(), 0.1);
        control.reposition();
        control.reposition();
        assert!(shared.take_reposition());
        assert!(!shared.take_reposition());
    }

    #[test]
    fn stop_moves_lifecycle_forward_only() {
        let (control, _rx, shared) = channel(StretchProfile::default(), 0.1);
        assert!(control.is_active());
        control.stop();
        assert_eq!(control.lifecycle(), Lifecycle::Stopping);
        shared.mark_disposed();
        control.stop();
        assert_eq!(control.lifecycle(), Lifecycle::Disposed);
        assert!(control.set_playback_rate(2.0).is_err());
    }

    #[test]
    fn full_queue_refuses_changes_without_mirroring() {
        let (control, rx, _shared) = channel(StretchProfile::default(), 0.1);
        for _ in 0..COMMAND_QUEUE_DEPTH {
            control.set_playback_rate(2.0).unwrap();
        }
        assert!(control.set_playback_rate(3.0).is_err());
        assert_eq!(control.playback_rate(), 2.0);
        assert_eq!(rx.len(), COMMAND_QUEUE_DEPTH);

        rx.try_recv().unwrap();
        control.set_playback_rate(3.0).unwrap();
        assert_eq!(control.playback_rate(), 3.0);
    }

    #[test]
    fn send_fails_once_adapter_side_is_dropped() {
        let (control, rx, _shared) = channel(StretchProfile::default(), 0.1);
        drop(rx);
        assert!(control.set_playback_rate(2.0).is_err());
    }
}
