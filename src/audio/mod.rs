pub mod decode;

use crate::cache::{Record, LE};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// One stereo sample pair, nominally in [-1, 1] but not clamped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StereoSample {
    pub left: f32,
    pub right: f32,
}

impl StereoSample {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Mono mixdown used by the spectral stage.
    pub fn mono(&self) -> f64 {
        (self.left as f64 + self.right as f64) / 2.0
    }
}

impl Record for StereoSample {
    fn width(&self) -> usize {
        8
    }

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_f32::<LE>(self.left)?;
        w.write_f32::<LE>(self.right)
    }

    fn decode<R: Read>(r: &mut R, _width: usize) -> io::Result<Self> {
        let left = r.read_f32::<LE>()?;
        let right = r.read_f32::<LE>()?;
        Ok(Self { left, right })
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("sample source ended early: expected {expected} samples, got {actual}")]
    Truncated { expected: u64, actual: u64 },
    #[error("failed to decode audio: {0}")]
    Corrupt(String),
}

/// Sequential, restartable PCM source — the interface the native decode
/// engine is assumed to expose. Each cache build seeks to the start once and
/// then reads straight through; a decode failure aborts that build.
pub trait SampleSource: Send {
    fn sample_count(&self) -> u64;
    fn sample_rate(&self) -> u32;

    /// Seek back to the first sample.
    fn restart(&mut self) -> Result<(), DecodeError>;

    /// Next sample in sequence, or `None` at the end of the track.
    fn next_sample(&mut self) -> Result<Option<StereoSample>, DecodeError>;

    fn duration_ms(&self) -> f64 {
        self.sample_count() as f64 * 1000.0 / self.sample_rate() as f64
    }
}

/// Fully-decoded in-memory source. The Symphonia decoder produces one of
/// these; tests construct them directly from synthetic sample vectors.
pub struct MemorySource {
    samples: Vec<StereoSample>,
    sample_rate: u32,
    pos: usize,
}

impl MemorySource {
    pub fn new(samples: Vec<StereoSample>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            pos: 0,
        }
    }
}

impl SampleSource for MemorySource {
    fn sample_count(&self) -> u64 {
        self.samples.len() as u64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn restart(&mut self) -> Result<(), DecodeError> {
        self.pos = 0;
        Ok(())
    }

    fn next_sample(&mut self) -> Result<Option<StereoSample>, DecodeError> {
        let sample = self.samples.get(self.pos).copied();
        if sample.is_some() {
            self.pos += 1;
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_restarts_from_the_beginning() {
        let samples = vec![
            StereoSample::new(0.1, -0.1),
            StereoSample::new(0.2, -0.2),
            StereoSample::new(0.3, -0.3),
        ];
        let mut source = MemorySource::new(samples.clone(), 44100);

        assert_eq!(source.next_sample().unwrap(), Some(samples[0]));
        assert_eq!(source.next_sample().unwrap(), Some(samples[1]));

        source.restart().unwrap();
        assert_eq!(source.next_sample().unwrap(), Some(samples[0]));
        assert_eq!(source.next_sample().unwrap(), Some(samples[1]));
        assert_eq!(source.next_sample().unwrap(), Some(samples[2]));
        assert_eq!(source.next_sample().unwrap(), None);
    }

    #[test]
    fn mono_averages_both_channels() {
        let s = StereoSample::new(0.5, -0.25);
        assert!((s.mono() - 0.125).abs() < 1e-9);
    }

    #[test]
    fn duration_follows_count_and_rate() {
        let source = MemorySource::new(vec![StereoSample::new(0.0, 0.0); 44100], 44100);
        assert!((source.duration_ms() - 1000.0).abs() < 1e-9);
    }
}
