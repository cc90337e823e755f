//! Variable-speed audio playback.
//!
//! [`VarispeedSource`] wraps any [`AudioSource`] and a [`StretchEngine`], giving
//! continuously adjustable playback rate (pitch follows speed) or tempo (pitch
//! preserved). Around it the crate ships the pieces of a small player: a Symphonia file
//! source, a Rubato-based resampler and engine, and a CPAL output stage.

mod adapter;
pub mod config;
pub mod control;
pub mod decode;
pub mod device;
pub mod engine;
pub mod filter;
pub mod format;
pub mod playback;
pub mod profile;
pub mod resample;
pub mod source;
pub mod status;

#[cfg(test)]
mod test_support;

pub use adapter::VarispeedSource;
pub use config::VarispeedConfig;
pub use control::{Lifecycle, VarispeedControl};
pub use engine::{NativeEngine, StretchEngine};
pub use format::Format;
pub use profile::{RATE_EPSILON, StretchMode, StretchProfile};
pub use source::AudioSource;
