use std::fmt;

use crate::control::{Lifecycle, VarispeedControl};
use crate::decode::SeekHandle;
use crate::playback::PlaybackHandle;
use crate::profile::{StretchMode, StretchProfile};

/// Handles a control surface needs to report on a playback session.
#[derive(Clone, Debug)]
pub struct PlayerStatus {
    control: VarispeedControl,
    seek: SeekHandle,
    playback: PlaybackHandle,
    duration_ms: Option<u64>,
}

/// Point-in-time view of a playback session.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    /// Source read position in milliseconds.
    pub position_ms: u64,
    /// Total duration when the container reports it.
    pub duration_ms: Option<u64>,
    pub playback_rate: f32,
    pub profile: StretchProfile,
    pub lifecycle: Lifecycle,
    /// Output reached end of stream.
    pub finished: bool,
}

impl PlayerStatus {
    pub fn new(
        control: VarispeedControl,
        seek: SeekHandle,
        playback: PlaybackHandle,
        duration_ms: Option<u64>,
    ) -> Self {
        Self {
            control,
            seek,
            playback,
            duration_ms,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            position_ms: self.seek.position_ms(),
            duration_ms: self.duration_ms,
            playback_rate: self.control.playback_rate(),
            profile: self.control.profile(),
            lifecycle: self.control.lifecycle(),
            finished: self.playback.is_finished(),
        }
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_clock(self.position_ms))?;
        if let Some(total) = self.duration_ms {
            write!(f, " / {}", format_clock(total))?;
        }
        let mode = match self.profile.mode() {
            StretchMode::Rate => "speed",
            StretchMode::Tempo => "tempo",
        };
        write!(
            f,
            "  {:.2}x {mode} aa={} quickseek={}",
            self.playback_rate,
            on_off(self.profile.use_anti_aliasing),
            on_off(self.profile.use_quick_seek),
        )
    }
}

fn on_off(v: bool) -> &'static str {
    if v { "on" } else { "off" }
}

/// `mm:ss`, minutes not wrapped at the hour.
pub fn format_clock(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
