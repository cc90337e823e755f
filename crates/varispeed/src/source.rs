//! Pull contract shared by sources and adapters.

use anyhow::Result;

use crate::format::Format;

/// A pull-style producer of interleaved `f32` samples.
///
/// `read` fills `buf` from the front and returns the number of samples written. It
/// returns fewer than `buf.len()` only at end of stream; once it has returned `0` it
/// keeps returning `0`. The format never changes.
///
/// Implementations are expected to eventually either fill the request or report end of
/// stream; a source that does neither starves its consumer.
pub trait AudioSource {
    fn format(&self) -> Format;

    fn read(&mut self, buf: &mut [f32]) -> Result<usize>;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn format(&self) -> Format {
        (**self).format()
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        (**self).read(buf)
    }
}

/// In-memory source over an owned interleaved buffer.
///
/// Handy for offline rendering and tests.
pub struct MemorySource {
    format: Format,
    samples: Vec<f32>,
    pos: usize,
}

impl MemorySource {
    pub fn new(format: Format, samples: Vec<f32>) -> Self {
        Self {
            format,
            samples,
            pos: 0,
        }
    }

    /// Samples not yet read.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.pos
    }
}

impl AudioSource for MemorySource {
    fn format(&self) -> Format {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
