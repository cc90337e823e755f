//! Varispeed: plays an audio file with live speed and tempo control.
//!
//! ## Pipeline
//! 1. **Decode**: Symphonia decodes the file on demand, in 100 ms reads.
//! 2. **Stretch**: `VarispeedSource` feeds a stretch engine and repacks its output into
//!    the block size the device asks for.
//! 3. **Resample**: Rubato converts to the device rate when the device cannot run at
//!    the file's rate.
//! 4. **Playback**: the CPAL callback pulls the chain directly.
//!
//! Rate, mode and position are changed from stdin while playing.

mod cli;
mod commands;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,varispeed=info")),
        )
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    match args.cmd {
        Some(cmd) => runtime::run_play(config::PlayConfig::from_command(cmd, args.device)?),
        None => {
            println!("nothing to do: pass `play <file>` or `--list-devices` (see --help)");
            Ok(())
        }
    }
}
