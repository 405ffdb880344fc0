use anyhow::Result;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::audio::StereoSample;
use crate::cache::{decode_f64_row, encode_f64_row, Record};

/// Samples per analysis frame. Fixed for the lifetime of a track's analysis.
pub const FRAME_SIZE: usize = 1024;

/// Magnitude spectrum of one frame: `FRAME_SIZE` bins in FFT order,
/// mirrored half included.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumFrame {
    pub magnitudes: Vec<f64>,
}

impl Record for SpectrumFrame {
    fn width(&self) -> usize {
        self.magnitudes.len() * std::mem::size_of::<f64>()
    }

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        encode_f64_row(&self.magnitudes, w)
    }

    fn decode<R: Read>(r: &mut R, width: usize) -> io::Result<Self> {
        Ok(Self {
            magnitudes: decode_f64_row(r, width)?,
        })
    }
}

/// Frames a stereo sample stream into non-overlapping `FRAME_SIZE` windows
/// and produces one magnitude spectrum per frame. Stateless across frames;
/// the output is fully determined by the input sequence.
pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f64>>,
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(FRAME_SIZE),
        }
    }

    /// Lazily transform a sample sequence into spectrum frames. The final
    /// frame is zero-padded on the right when the stream ends mid-frame.
    pub fn spectra<I>(&self, samples: I) -> Spectra<I>
    where
        I: Iterator<Item = Result<StereoSample>>,
    {
        Spectra {
            fft: Arc::clone(&self.fft),
            samples,
            done: false,
        }
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Spectra<I> {
    fft: Arc<dyn Fft<f64>>,
    samples: I,
    done: bool,
}

impl<I> Iterator for Spectra<I>
where
    I: Iterator<Item = Result<StereoSample>>,
{
    type Item = Result<SpectrumFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buffer: Vec<Complex<f64>> = Vec::with_capacity(FRAME_SIZE);
        while buffer.len() < FRAME_SIZE {
            match self.samples.next() {
                Some(Ok(sample)) => buffer.push(Complex::new(sample.mono(), 0.0)),
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    if buffer.is_empty() {
                        return None;
                    }
                    buffer.resize(FRAME_SIZE, Complex::new(0.0, 0.0));
                    break;
                }
            }
        }

        self.fft.process(&mut buffer);

        Some(Ok(SpectrumFrame {
            magnitudes: buffer.iter().map(|c| c.norm()).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_of(samples: Vec<StereoSample>) -> Vec<SpectrumFrame> {
        SpectralAnalyzer::new()
            .spectra(samples.into_iter().map(Ok))
            .collect::<Result<_>>()
            .unwrap()
    }

    fn sine_track(bin: usize, frames: usize) -> Vec<StereoSample> {
        (0..frames * FRAME_SIZE)
            .map(|n| {
                let v =
                    (2.0 * std::f32::consts::PI * bin as f32 * n as f32 / FRAME_SIZE as f32).sin();
                StereoSample::new(v, v)
            })
            .collect()
    }

    #[test]
    fn empty_input_yields_no_frames() {
        assert!(frames_of(Vec::new()).is_empty());
    }

    #[test]
    fn short_final_frame_is_zero_padded() {
        let samples = vec![StereoSample::new(1.0, 1.0); FRAME_SIZE + 10];
        let frames = frames_of(samples);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].magnitudes.len(), FRAME_SIZE);
        assert_eq!(frames[1].magnitudes.len(), FRAME_SIZE);
        // 10 unit samples in an otherwise zero frame: DC bin is their sum.
        assert!((frames[1].magnitudes[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sine_at_bin_k_dominates_the_spectrum() {
        // 4 frames of a pure tone aligned to bin 37. A real signal mirrors
        // into bin FRAME_SIZE - 37; together the pair carries nearly all of
        // the magnitude, and bin 37 leads the lower half.
        let bin = 37;
        let frames = frames_of(sine_track(bin, 4));
        assert_eq!(frames.len(), 4);

        for frame in &frames {
            let total: f64 = frame.magnitudes.iter().sum();
            let pair = frame.magnitudes[bin] + frame.magnitudes[FRAME_SIZE - bin];
            assert!(pair > 0.9 * total, "pair {} of total {}", pair, total);

            let peak = frame.magnitudes[..FRAME_SIZE / 2]
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(peak, bin);
        }
    }

    #[test]
    fn silence_produces_zero_magnitudes() {
        let frames = frames_of(vec![StereoSample::new(0.0, 0.0); FRAME_SIZE * 2]);
        for frame in frames {
            assert!(frame.magnitudes.iter().all(|&m| m == 0.0));
        }
    }

    #[test]
    fn opposite_channels_cancel_in_the_mono_mix() {
        let samples: Vec<StereoSample> = (0..FRAME_SIZE)
            .map(|n| {
                let v = (n as f32 * 0.01).sin();
                StereoSample::new(v, -v)
            })
            .collect();
        let frames = frames_of(samples);
        assert!(frames[0].magnitudes.iter().all(|&m| m.abs() < 1e-9));
    }
}
