//! Pull-based sample source contract shared by every stage.

use crate::core::types::{AudioBuffer, Sample};
use crate::error::Result;

/// A pull-based stream of interleaved `f32` samples.
///
/// Positions and lengths count interleaved samples, not frames. Channel count
/// and sample rate are fixed for the lifetime of the source. Dropping the
/// source releases everything it holds.
pub trait SampleSource: Send {
    /// Fills `buf` from the current position and returns the number of samples
    /// written. Reads need not be frame aligned: a read may stop mid-frame and
    /// the next one continues with the following sample. `0` signals end of
    /// stream and is never returned for a non-empty `buf` before then.
    fn read(&mut self, buf: &mut [Sample]) -> usize;

    /// Current read cursor in samples.
    fn position(&self) -> u64;

    /// Seeks to `position` samples.
    fn set_position(&mut self, position: u64) -> Result<()>;

    /// Total readable samples, including any tail a stage appends.
    fn length(&self) -> u64;

    /// Interleaved channel count.
    fn channels(&self) -> u16;

    /// Sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Whether `read` can produce data at all.
    fn is_readable(&self) -> bool {
        true
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read(&mut self, buf: &mut [Sample]) -> usize {
        (**self).read(buf)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        (**self).set_position(position)
    }

    fn length(&self) -> u64 {
        (**self).length()
    }

    fn channels(&self) -> u16 {
        (**self).channels()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn is_readable(&self) -> bool {
        (**self).is_readable()
    }
}

/// Reads until `buf` is full or `source` reports end of stream.
///
/// Stages pull through this so that an upstream that hands out data in
/// smaller pieces than requested is not mistaken for one that has ended.
pub fn read_fully<S: SampleSource + ?Sized>(source: &mut S, buf: &mut [Sample]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]);
        if n == 0 {
            break;
        }
        filled += n;
    }
    filled
}

/// In-memory decoded audio exposed as a [`SampleSource`].
#[derive(Debug, Clone)]
pub struct MemorySource {
    buffer: AudioBuffer,
    position: usize,
    max_read: Option<usize>,
}

impl MemorySource {
    /// Wraps a decoded buffer, positioned at its start.
    pub fn new(buffer: AudioBuffer) -> Self {
        Self {
            buffer,
            position: 0,
            max_read: None,
        }
    }

    /// Builds a source from raw interleaved samples.
    pub fn from_interleaved(data: Vec<Sample>, channels: u16, sample_rate: u32) -> Result<Self> {
        Ok(Self::new(AudioBuffer::new(data, channels, sample_rate)?))
    }

    /// Caps every `read` at `max` samples, the way a codec handing out one
    /// packet per call behaves.
    pub fn with_max_read(mut self, max: usize) -> Self {
        self.max_read = Some(max.max(1));
        self
    }

    /// The wrapped buffer.
    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }
}

impl SampleSource for MemorySource {
    fn read(&mut self, buf: &mut [Sample]) -> usize {
        let remaining = self.buffer.data.len().saturating_sub(self.position);
        let mut n = buf.len().min(remaining);
        if let Some(max) = self.max_read {
            n = n.min(max);
        }
        buf[..n].copy_from_slice(&self.buffer.data[self.position..self.position + n]);
        self.position += n;
        n
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        let channels = self.buffer.channels as u64;
        let aligned = position - position % channels;
        self.position = aligned.min(self.buffer.data.len() as u64) as usize;
        Ok(())
    }

    fn length(&self) -> u64 {
        self.buffer.data.len() as u64
    }

    fn channels(&self) -> u16 {
        self.buffer.channels
    }

    fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate
    }
}
