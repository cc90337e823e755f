//! Pull-based file decoding.
//!
//! [`FileSource`] wraps a Symphonia format reader and decoder as an [`AudioSource`]:
//! - probes the container/codec once on open,
//! - decodes packets on demand into interleaved `f32`,
//! - honours seek requests posted through a [`SeekHandle`] from any thread.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::format::Format;
use crate::source::AudioSource;

const NO_SEEK: u64 = u64::MAX;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Container/extension hint (best-effort).
    pub container: Option<String>,
}

/// Cross-thread handle for seeking a [`FileSource`] and observing its position.
#[derive(Clone, Debug)]
pub struct SeekHandle {
    request_ms: Arc<AtomicU64>,
    position_frames: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
    sample_rate: u32,
}

impl SeekHandle {
    /// Idle handle for a stream at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            request_ms: Arc::new(AtomicU64::new(NO_SEEK)),
            position_frames: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicBool::new(false)),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Ask the source to jump to `ms`. Applied on its next read.
    pub fn seek_ms(&self, ms: u64) {
        self.request_ms.store(ms.min(NO_SEEK - 1), Ordering::Release);
    }

    /// Decoder read position in milliseconds.
    pub fn position_ms(&self) -> u64 {
        self.position_frames.load(Ordering::Relaxed) * 1000 / self.sample_rate as u64
    }

    /// `true` once after a requested seek could not be performed; the position is
    /// unchanged in that case.
    pub fn take_failure(&self) -> bool {
        self.failed.swap(false, Ordering::AcqRel)
    }
}

/// Seekable decoded audio stream.
pub struct FileSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: Format,
    pending: Vec<f32>,
    pending_pos: usize,
    /// Decoded frames to drop after an accurate seek landed early.
    skip_frames: u64,
    seek: SeekHandle,
    duration_ms: Option<u64>,
    info: SourceInfo,
    eof: bool,
}

impl FileSource {
    /// Open and probe `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        let mut hint = Hint::new();
        let ext = path.extension().and_then(|e| e.to_str());
        if let Some(ext) = ext {
            hint.with_extension(ext);
        }
        let mut source = Self::from_media_source(Box::new(file), hint)?;
        source.info.container = ext.map(str::to_ascii_lowercase);
        Ok(source)
    }

    /// Probe an arbitrary Symphonia [`MediaSource`].
    pub fn from_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let reader = probed.format;

        let track = reader
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let codec_params: CodecParameters = track.codec_params.clone();
        let track_id = track.id;

        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let format = Format::new(rate, channels)?;

        let decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let info = SourceInfo {
            codec: codec_name_from_params(&codec_params),
            bit_depth: codec_params
                .bits_per_sample
                .or(codec_params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
            container: None,
        };
        let duration_ms = duration_ms_from_codec_params(&codec_params);

        tracing::info!(
            rate_hz = rate,
            channels,
            codec = info.codec.as_deref().unwrap_or("unknown"),
            duration_ms = duration_ms.unwrap_or(0),
            "source opened"
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            format,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
            seek: SeekHandle::new(rate),
            duration_ms,
            info,
            eof: false,
        })
    }

    pub fn seek_handle(&self) -> SeekHandle {
        self.seek.clone()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn position_ms(&self) -> u64 {
        self.seek.position_ms()
    }

    /// Seek immediately on the calling thread.
    pub fn seek_to_ms(&mut self, ms: u64) -> Result<()> {
        let ms = match self.duration_ms {
            Some(d) => ms.min(d),
            None => ms,
        };
        let time = Time::new(ms / 1000, (ms % 1000) as f64 / 1000.0);
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .with_context(|| format!("seek to {ms} ms"))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.eof = false;
        self.seek
            .position_frames
            .store(self.format.ms_to_frames(ms), Ordering::Relaxed);
        tracing::debug!(
            ms,
            required_ts = seeked.required_ts,
            actual_ts = seeked.actual_ts,
            "seek"
        );
        Ok(())
    }

    fn apply_seek_request(&mut self) {
        let ms = self.seek.request_ms.swap(NO_SEEK, Ordering::AcqRel);
        if ms == NO_SEEK {
            return;
        }
        if let Err(e) = self.seek_to_ms(ms) {
            tracing::error!("seek failed: {e:#}");
            self.seek.failed.store(true, Ordering::Release);
        }
    }

    /// Decode the next packet of our track into `pending`. Returns `false` at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(anyhow!("read packet: {e}")),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(anyhow!("decode: {e}")),
            };

            let mut sample_buf =
                SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);

            let samples = sample_buf.samples();
            let ch = self.format.channels;
            let skip = (self.skip_frames as usize).min(samples.len() / ch);
            self.skip_frames -= skip as u64;

            self.pending.clear();
            self.pending.extend_from_slice(&samples[skip * ch..]);
            self.pending_pos = 0;
            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl AudioSource for FileSource {
    fn format(&self) -> Format {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        self.apply_seek_request();

        let mut written = 0;
        while written < buf.len() {
            if self.pending_pos >= self.pending.len() {
                if self.eof || !self.decode_next()? {
                    self.eof = true;
                    break;
                }
            }
            let n = (buf.len() - written).min(self.pending.len() - self.pending_pos);
            buf[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }

        let frames = (written / self.format.channels) as u64;
        self.seek
            .position_frames
            .fetch_add(frames, Ordering::Relaxed);
        Ok(written)
    }
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for status output.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use symphonia::core::codecs::*;
    use symphonia::core::io::ReadOnlySource;

    /// Mono 16-bit PCM WAV holding a ramp of `frames` samples.
    fn wav_bytes(rate: u32, frames: u32) -> Vec<u8> {
        let data_len = frames * 2;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..frames {
            out.extend_from_slice(&((i % 1000) as i16).to_le_bytes());
        }
        out
    }

    fn open_wav(rate: u32, frames: u32) -> FileSource {
        let mut hint = Hint::new();
        hint.with_extension("wav");
        FileSource::from_media_source(Box::new(Cursor::new(wav_bytes(rate, frames))), hint)
            .unwrap()
    }

    fn drain(src: &mut FileSource) -> usize {
        let mut buf = vec![0.0f32; 777];
        let mut total = 0;
        loop {
            let n = src.read(&mut buf).unwrap();
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    #[test]
    fn decodes_whole_file() {
        let mut src = open_wav(8_000, 8_000);
        assert_eq!(src.format(), Format::new(8_000, 1).unwrap());
        assert_eq!(src.duration_ms(), Some(1_000));
        assert_eq!(src.info().codec.as_deref(), Some("PCM_S16"));

        assert_eq!(drain(&mut src), 8_000);
        assert_eq!(src.position_ms(), 1_000);
        assert_eq!(src.read(&mut [0.0; 16]).unwrap(), 0);
    }

    #[test]
    fn seek_request_applies_on_next_read() {
        let mut src = open_wav(8_000, 8_000);
        let handle = src.seek_handle();
        let mut buf = vec![0.0f32; 1_000];
        src.read(&mut buf).unwrap();

        handle.seek_ms(500);
        assert_eq!(handle.position_ms(), 125);

        let remaining = drain(&mut src);
        assert!((remaining as i64 - 4_000).abs() <= 2, "got {remaining}");
        assert!((999..=1_000).contains(&handle.position_ms()));
        assert!(!handle.take_failure());
    }

    #[test]
    fn failed_seek_is_reported_and_playback_continues() {
        let mut hint = Hint::new();
        hint.with_extension("wav");
        let bytes = Cursor::new(wav_bytes(8_000, 8_000));
        let mut src =
            FileSource::from_media_source(Box::new(ReadOnlySource::new(bytes)), hint).unwrap();
        let handle = src.seek_handle();
        let mut buf = vec![0.0f32; 2_000];
        assert_eq!(src.read(&mut buf).unwrap(), 2_000);

        // backwards on a stream that cannot rewind
        handle.seek_ms(0);
        let remaining = drain(&mut src);
        assert!(handle.take_failure());
        assert!(!handle.take_failure());
        assert_eq!(remaining, 6_000);
    }

    #[test]
    fn seek_back_after_end_resumes() {
        let mut src = open_wav(8_000, 4_000);
        drain(&mut src);
        src.seek_to_ms(0).unwrap();
        assert_eq!(src.position_ms(), 0);
        assert_eq!(drain(&mut src), 4_000);
    }

    #[test]
    fn duration_ms_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_ms_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_ms_from_codec_params(&params), Some(2000));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC".to_string()));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }
}
