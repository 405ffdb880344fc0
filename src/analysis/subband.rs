use anyhow::Result;
use std::io::{self, Read, Write};

use super::spectral::{SpectrumFrame, FRAME_SIZE};
use crate::cache::{decode_f64_row, encode_f64_row, Record};

/// Number of subbands each spectrum frame is reduced to. `FRAME_SIZE` must
/// divide evenly into this many groups.
pub const SUBBAND_COUNT: usize = 128;

const _: () = assert!(FRAME_SIZE % SUBBAND_COUNT == 0);

/// One subband's contrast series across all frames of a track.
#[derive(Clone, Debug, PartialEq)]
pub struct SubbandSeries {
    pub values: Vec<f64>,
}

impl Record for SubbandSeries {
    fn width(&self) -> usize {
        self.values.len() * std::mem::size_of::<f64>()
    }

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        encode_f64_row(&self.values, w)
    }

    fn decode<R: Read>(r: &mut R, width: usize) -> io::Result<Self> {
        Ok(Self {
            values: decode_f64_row(r, width)?,
        })
    }
}

/// Reduce one spectrum frame to `SUBBAND_COUNT` energies: contiguous groups
/// of `FRAME_SIZE / SUBBAND_COUNT` bins are summed, then scaled by
/// `SUBBAND_COUNT / FRAME_SIZE` so the energy scale is independent of the
/// frame size.
pub fn subband_energies(frame: &SpectrumFrame) -> Vec<f64> {
    let group = frame.magnitudes.len() / SUBBAND_COUNT;
    let scale = SUBBAND_COUNT as f64 / frame.magnitudes.len() as f64;
    frame
        .magnitudes
        .chunks_exact(group)
        .map(|bins| bins.iter().sum::<f64>() * scale)
        .collect()
}

/// Local-contrast transform of one subband's energy series: each window of
/// `window` frames contributes `series[start] - mean(window)`.
///
/// The result holds exactly `len - window + 1` values; a series shorter than
/// the window yields an empty result.
pub fn contrast_series(series: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || series.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(series.len() - window + 1);
    // Running window sum instead of re-summing each position.
    let mut sum: f64 = series[..window].iter().sum();
    for start in 0..=series.len() - window {
        out.push(series[start] - sum / window as f64);
        if start + window < series.len() {
            sum += series[start + window] - series[start];
        }
    }
    out
}

/// Consume a spectrum-frame sequence and produce the per-subband contrast
/// series, subband-major. The transpose requires the full frame set, so the
/// input is drained before any series is emitted.
pub fn extract<I>(spectra: I, window: usize) -> Result<Vec<SubbandSeries>>
where
    I: Iterator<Item = Result<SpectrumFrame>>,
{
    let mut per_band: Vec<Vec<f64>> = vec![Vec::new(); SUBBAND_COUNT];
    for frame in spectra {
        let energies = subband_energies(&frame?);
        for (band, energy) in energies.into_iter().enumerate() {
            per_band[band].push(energy);
        }
    }

    Ok(per_band
        .into_iter()
        .map(|series| SubbandSeries {
            values: contrast_series(&series, window),
        })
        .collect())
}
