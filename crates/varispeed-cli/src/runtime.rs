//! Player runtime.
//!
//! Wires `FileSource -> VarispeedSource -> [ResampleSource] -> CPAL` and runs the
//! interactive control loop on the main thread.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::RecvTimeoutError;
use varispeed::decode::{FileSource, SeekHandle};
use varispeed::playback::{self, PlaybackConfig};
use varispeed::resample::{ResampleQuality, ResampleSource};
use varispeed::status::{PlayerStatus, format_clock};
use varispeed::{
    AudioSource, NativeEngine, StretchMode, StretchProfile, VarispeedControl, VarispeedSource,
    device,
};

use crate::commands::{self, PlayerCommand};
use crate::config::PlayConfig;

/// Position display cadence.
const TICK: Duration = Duration::from_millis(500);

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Play one file until it ends, the user stops it, or Ctrl-C.
pub fn run_play(config: PlayConfig) -> Result<()> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, config.device.as_deref())?;
    tracing::info!(device = %device.description()?, "output device");

    let file = FileSource::open(&config.path)?;
    let seek = file.seek_handle();
    let duration_ms = file.duration_ms();
    let src_format = file.format();

    let adapter = VarispeedSource::new(
        file,
        NativeEngine::default(),
        config.profile,
        config.varispeed.clone(),
    )?;
    let control = adapter.control();
    control.set_playback_rate(config.initial_rate)?;

    let supported =
        device::pick_output_config(&device, src_format.sample_rate, src_format.channels as u16)?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }
    tracing::info!(
        source_rate_hz = src_format.sample_rate,
        output_rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        buffer_size = ?stream_config.buffer_size,
        "device output config"
    );

    let source: Box<dyn AudioSource + Send> = if stream_config.sample_rate != src_format.sample_rate
    {
        Box::new(ResampleSource::new(
            adapter,
            stream_config.sample_rate,
            ResampleQuality::High,
        )?)
    } else {
        Box::new(adapter)
    };

    let paused = Arc::new(AtomicBool::new(false));
    let (stream, handle) = playback::build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        source,
        PlaybackConfig {
            paused: Some(paused.clone()),
        },
    )?;
    stream.play()?;

    let status = PlayerStatus::new(control.clone(), seek.clone(), handle.clone(), duration_ms);

    let ctrlc_control = control.clone();
    if let Err(e) = ctrlc::set_handler(move || ctrlc_control.stop()) {
        tracing::warn!("ctrl-c handler not installed: {e}");
    }

    let lines = spawn_stdin_reader();
    println!("{}", commands::HELP);

    let mut last_clock = String::new();
    let mut stdin_open = true;
    while !handle.is_finished() {
        let line = if stdin_open {
            match lines.recv_timeout(TICK) {
                Ok(line) => Some(line),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    stdin_open = false;
                    None
                }
            }
        } else {
            thread::sleep(TICK);
            None
        };

        if let Some(line) = line {
            match commands::parse(&line) {
                Ok(Some(cmd)) => {
                    if !apply(cmd, &control, &seek, &paused, &status) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{e}"),
            }
        }

        if seek.take_failure() {
            println!("seek failed, position unchanged");
        }

        let clock = format_clock(seek.position_ms());
        if clock != last_clock {
            tracing::debug!(position = %clock, "position");
            last_clock = clock;
        }
    }

    drop(stream);
    if handle.has_failed() {
        bail!("playback stopped after a source error");
    }
    tracing::info!(position = %format_clock(seek.position_ms()), "playback finished");
    Ok(())
}

/// Execute one command. Returns `false` when playback should end.
fn apply(
    cmd: PlayerCommand,
    control: &VarispeedControl,
    seek: &SeekHandle,
    paused: &AtomicBool,
    status: &PlayerStatus,
) -> bool {
    let result = match cmd {
        PlayerCommand::Seek { ms } => {
            seek.seek_ms(ms);
            control.reposition();
            Ok(())
        }
        PlayerCommand::Pause(on) => {
            paused.store(on, Ordering::Relaxed);
            tracing::info!(paused = on, "playback");
            Ok(())
        }
        PlayerCommand::Status => {
            println!("{}", status.snapshot());
            Ok(())
        }
        PlayerCommand::Help => {
            println!("{}", commands::HELP);
            Ok(())
        }
        PlayerCommand::Stop => {
            control.stop();
            return false;
        }
        other => {
            if let Some(rate) = next_rate(other, control.playback_rate()) {
                control.set_playback_rate(rate)
            } else if let Some(profile) = next_profile(other, control.profile()) {
                control.set_profile(profile)
            } else {
                Ok(())
            }
        }
    };
    if let Err(e) = result {
        println!("{e}");
    }
    true
}

fn next_rate(cmd: PlayerCommand, current: f32) -> Option<f32> {
    match cmd {
        PlayerCommand::Rate(r) => Some(r),
        PlayerCommand::Faster => Some(commands::step_rate(current, true)),
        PlayerCommand::Slower => Some(commands::step_rate(current, false)),
        _ => None,
    }
}

fn next_profile(cmd: PlayerCommand, current: StretchProfile) -> Option<StretchProfile> {
    match cmd {
        PlayerCommand::Mode(mode) => Some(StretchProfile {
            use_tempo: mode == StretchMode::Tempo,
            ..current
        }),
        PlayerCommand::AntiAlias(on) => Some(StretchProfile {
            use_anti_aliasing: on,
            ..current
        }),
        PlayerCommand::QuickSeek(on) => Some(current.with_quick_seek(on)),
        _ => None,
    }
}

fn spawn_stdin_reader() -> crossbeam_channel::Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("stdin read error: {e}");
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use varispeed::format::Format;
    use varispeed::playback::PlaybackHandle;
    use varispeed::source::MemorySource;

    fn session() -> (VarispeedControl, SeekHandle, PlayerStatus) {
        let fmt = Format::new(8_000, 2).unwrap();
        let adapter = VarispeedSource::new(
            MemorySource::new(fmt, Vec::new()),
            NativeEngine::default(),
            StretchProfile::default(),
            Default::default(),
        )
        .unwrap();
        let control = adapter.control();
        let seek = SeekHandle::new(fmt.sample_rate);
        let status = PlayerStatus::new(
            control.clone(),
            seek.clone(),
            PlaybackHandle::default(),
            None,
        );
        (control, seek, status)
    }

    #[test]
    fn rate_commands_map_to_rates() {
        assert_eq!(next_rate(PlayerCommand::Rate(0.0), 1.0), Some(0.0));
        assert_eq!(next_rate(PlayerCommand::Faster, 1.0), Some(1.1));
        assert_eq!(next_rate(PlayerCommand::Slower, 0.5), Some(0.4));
        assert_eq!(next_rate(PlayerCommand::Status, 1.0), None);
    }

    #[test]
    fn pause_command_sets_output_flag() {
        let (control, seek, status) = session();
        let paused = AtomicBool::new(false);
        assert!(apply(PlayerCommand::Pause(true), &control, &seek, &paused, &status));
        assert!(paused.load(Ordering::Relaxed));
        assert!(apply(PlayerCommand::Pause(false), &control, &seek, &paused, &status));
        assert!(!paused.load(Ordering::Relaxed));
    }

    #[test]
    fn profile_commands_keep_other_flags() {
        let current = StretchProfile::new(false, true).with_quick_seek(true);
        assert_eq!(
            next_profile(PlayerCommand::Mode(StretchMode::Tempo), current),
            Some(StretchProfile::new(true, true).with_quick_seek(true))
        );
        assert_eq!(
            next_profile(PlayerCommand::AntiAlias(false), current),
            Some(StretchProfile::new(false, false).with_quick_seek(true))
        );
        assert_eq!(
            next_profile(PlayerCommand::QuickSeek(false), current),
            Some(StretchProfile::new(false, true))
        );
        assert_eq!(next_profile(PlayerCommand::Rate(2.0), current), None);
    }
}
