//! Interactive commands read from stdin while a file plays.

use anyhow::{Result, anyhow, bail};
use varispeed::StretchMode;

/// Step used by `faster` / `slower`.
pub const RATE_STEP: f32 = 0.1;

/// Upper bound for `faster`.
pub const MAX_STEP_RATE: f32 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlayerCommand {
    Rate(f32),
    Faster,
    Slower,
    Mode(StretchMode),
    AntiAlias(bool),
    QuickSeek(bool),
    Seek { ms: u64 },
    Pause(bool),
    Status,
    Help,
    Stop,
}

pub const HELP: &str = "\
commands:
  rate <x>          set playback rate (0 = silence)
  faster | slower   change rate by 0.1
  speed | tempo     pitch follows speed / pitch preserved
  aa on|off         anti-aliasing filter
  quickseek on|off  faster, lower-quality tempo search
  seek <seconds>    jump to position
  pause | resume    hold or continue output
  status            print position and settings
  stop | quit       end playback";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<PlayerCommand>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let cmd = match head.to_ascii_lowercase().as_str() {
        "rate" | "r" => PlayerCommand::Rate(number(arg, "rate")?),
        "faster" | "+" => PlayerCommand::Faster,
        "slower" | "-" => PlayerCommand::Slower,
        "speed" => PlayerCommand::Mode(StretchMode::Rate),
        "tempo" => PlayerCommand::Mode(StretchMode::Tempo),
        "aa" => PlayerCommand::AntiAlias(switch(arg, "aa")?),
        "quickseek" | "qs" => PlayerCommand::QuickSeek(switch(arg, "quickseek")?),
        "seek" => {
            let secs: f64 = number(arg, "seek")?;
            if !secs.is_finite() || secs < 0.0 {
                bail!("seek position must be a non-negative number of seconds");
            }
            PlayerCommand::Seek {
                ms: (secs * 1000.0).round() as u64,
            }
        }
        "pause" | "p" => PlayerCommand::Pause(true),
        "resume" | "play" => PlayerCommand::Pause(false),
        "status" | "s" => PlayerCommand::Status,
        "help" | "?" => PlayerCommand::Help,
        "stop" | "quit" | "q" | "exit" => PlayerCommand::Stop,
        other => bail!("unknown command '{other}' (type 'help')"),
    };
    Ok(Some(cmd))
}

/// Rate after one `faster` / `slower` step from `current`.
pub fn step_rate(current: f32, up: bool) -> f32 {
    let next = if up {
        current + RATE_STEP
    } else {
        current - RATE_STEP
    };
    // snap to the 0.1 grid so repeated steps don't drift
    ((next * 10.0).round() / 10.0).clamp(0.0, MAX_STEP_RATE)
}

fn number<T: std::str::FromStr>(arg: Option<&str>, cmd: &str) -> Result<T> {
    let raw = arg.ok_or_else(|| anyhow!("'{cmd}' needs a value"))?;
    raw.parse()
        .map_err(|_| anyhow!("'{cmd}': '{raw}' is not a number"))
}

fn switch(arg: Option<&str>, cmd: &str) -> Result<bool> {
    match arg.map(str::to_ascii_lowercase).as_deref() {
        Some("on") | Some("1") | Some("true") => Ok(true),
        Some("off") | Some("0") | Some("false") => Ok(false),
        _ => bail!("'{cmd}' expects on or off"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_and_steps() {
        assert_eq!(parse("rate 1.5").unwrap(), Some(PlayerCommand::Rate(1.5)));
        assert_eq!(parse("  R 0 ").unwrap(), Some(PlayerCommand::Rate(0.0)));
        assert_eq!(parse("faster").unwrap(), Some(PlayerCommand::Faster));
        assert_eq!(parse("-").unwrap(), Some(PlayerCommand::Slower));
    }

    #[test]
    fn parses_profile_switches() {
        assert_eq!(
            parse("tempo").unwrap(),
            Some(PlayerCommand::Mode(StretchMode::Tempo))
        );
        assert_eq!(
            parse("speed").unwrap(),
            Some(PlayerCommand::Mode(StretchMode::Rate))
        );
        assert_eq!(parse("aa ON").unwrap(), Some(PlayerCommand::AntiAlias(true)));
        assert_eq!(parse("qs off").unwrap(), Some(PlayerCommand::QuickSeek(false)));
    }

    #[test]
    fn parses_seek_seconds() {
        assert_eq!(
            parse("seek 75.5").unwrap(),
            Some(PlayerCommand::Seek { ms: 75_500 })
        );
        assert!(parse("seek -3").is_err());
        assert!(parse("seek").is_err());
    }

    #[test]
    fn parses_pause_and_resume() {
        assert_eq!(parse("pause").unwrap(), Some(PlayerCommand::Pause(true)));
        assert_eq!(parse("P").unwrap(), Some(PlayerCommand::Pause(true)));
        assert_eq!(parse("resume").unwrap(), Some(PlayerCommand::Pause(false)));
        assert_eq!(parse("play").unwrap(), Some(PlayerCommand::Pause(false)));
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert_eq!(parse("   ").unwrap(), None);
        assert!(parse("jump 3").is_err());
        assert!(parse("rate fast").is_err());
        assert!(parse("aa maybe").is_err());
    }

    #[test]
    fn steps_snap_to_grid_and_clamp() {
        assert_eq!(step_rate(1.0, true), 1.1);
        assert_eq!(step_rate(0.5, false), 0.4);
        assert_eq!(step_rate(0.1, false), 0.0);
        assert_eq!(step_rate(0.0, false), 0.0);
        assert_eq!(step_rate(MAX_STEP_RATE, true), MAX_STEP_RATE);
        assert_eq!(step_rate(1.04, true), 1.1);
    }
}
