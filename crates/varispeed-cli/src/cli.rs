use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "varispeed", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file with live speed control (commands are read from stdin)
    Play {
        /// Path to audio file
        path: PathBuf,

        /// Initial playback rate (0 = silence, 1 = normal)
        #[arg(long, default_value_t = 1.0)]
        rate: f32,

        /// Whether the rate changes pitch (speed) or preserves it (tempo)
        #[arg(long, value_enum, default_value_t = Mode::Speed)]
        mode: Mode,

        /// Enable the engine's anti-aliasing filter
        #[arg(long)]
        anti_alias: bool,

        /// Use the faster, lower-quality tempo search
        #[arg(long)]
        quick_seek: bool,

        /// Source read size in milliseconds
        #[arg(long, default_value_t = 100)]
        read_ms: u32,

        /// Slowest playback rate accepted; slower non-zero rates are clamped to it
        #[arg(long, default_value_t = 0.1)]
        min_rate: f32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Pitch follows speed
    Speed,
    /// Pitch is preserved
    Tempo,
}
