use std::path::PathBuf;

use anyhow::Result;
use varispeed::{StretchProfile, VarispeedConfig};

use crate::cli::{Command, Mode};

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub initial_rate: f32,
    pub profile: StretchProfile,
    pub varispeed: VarispeedConfig,
}

impl PlayConfig {
    pub fn from_command(cmd: Command, device: Option<String>) -> Result<Self> {
        let Command::Play {
            path,
            rate,
            mode,
            anti_alias,
            quick_seek,
            read_ms,
            min_rate,
        } = cmd;

        let varispeed = VarispeedConfig {
            read_duration_ms: read_ms,
            min_playback_rate: min_rate,
            ..Default::default()
        };
        varispeed.validate()?;

        Ok(Self {
            path,
            device: normalize_device_name(device),
            initial_rate: rate,
            profile: StretchProfile::new(mode == Mode::Tempo, anti_alias)
                .with_quick_seek(quick_seek),
            varispeed,
        })
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(mode: Mode, min_rate: f32) -> Command {
        Command::Play {
            path: PathBuf::from("a.flac"),
            rate: 1.25,
            mode,
            anti_alias: true,
            quick_seek: true,
            read_ms: 50,
            min_rate,
        }
    }

    #[test]
    fn builds_profile_and_engine_config() {
        let cfg = PlayConfig::from_command(play(Mode::Tempo, 0.25), Some(" USB DAC ".into()))
            .unwrap();
        assert_eq!(cfg.device.as_deref(), Some("USB DAC"));
        assert_eq!(cfg.initial_rate, 1.25);
        assert_eq!(
            cfg.profile,
            StretchProfile::new(true, true).with_quick_seek(true)
        );
        assert_eq!(cfg.varispeed.read_duration_ms, 50);
        assert_eq!(cfg.varispeed.expansion_factor(), 4);
    }

    #[test]
    fn rejects_invalid_minimum_rate() {
        assert!(PlayConfig::from_command(play(Mode::Speed, 0.0), None).is_err());
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB  DAC ".to_string())),
            Some("USB  DAC".to_string())
        );
    }
}
