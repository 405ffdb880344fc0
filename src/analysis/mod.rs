//! The feature-extraction pipeline: raw samples → spectral frames →
//! per-subband contrast series, each stage backed by its own lazy disk
//! cache. Reading any stage triggers the upstream builds exactly once; the
//! whole pipeline runs synchronously on the calling thread.

pub mod onset;
pub mod spectral;
pub mod subband;

use anyhow::Result;
use parking_lot::{Mutex, MutexGuard};
use tempfile::TempDir;

use crate::audio::{SampleSource, StereoSample};
use crate::cache::{CacheReader, LazyDiskCache};
use self::spectral::{SpectralAnalyzer, SpectrumFrame};
use self::subband::SubbandSeries;

/// Default sliding-window size for the subband contrast transform.
pub const DEFAULT_WINDOW: usize = 42;

/// Per-track analysis state. Owns the sample source, the backing directory,
/// and the three caches. Cache contents are immutable once built and are
/// deleted (best-effort) when this value is dropped.
///
/// The window size is fixed at construction; the caches assume it never
/// changes once any of them has been built.
pub struct TrackAnalysis {
    source: Mutex<Box<dyn SampleSource>>,
    window: usize,
    sample_rate: u32,
    duration_ms: f64,
    samples: LazyDiskCache<StereoSample>,
    spectra: LazyDiskCache<SpectrumFrame>,
    subbands: LazyDiskCache<SubbandSeries>,
    _dir: TempDir,
}

impl TrackAnalysis {
    pub fn new(source: Box<dyn SampleSource>, window: usize) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("autocue-").tempdir()?;
        let sample_rate = source.sample_rate();
        let duration_ms = source.duration_ms();
        Ok(Self {
            source: Mutex::new(source),
            window,
            sample_rate,
            duration_ms,
            samples: LazyDiskCache::new("samples.bin", dir.path()),
            spectra: LazyDiskCache::new("spectra.bin", dir.path()),
            subbands: LazyDiskCache::new("subbands.bin", dir.path()),
            _dir: dir,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// One pass over the raw sample cache, building it from the source on
    /// first access.
    pub fn samples(&self) -> Result<CacheReader<StereoSample>> {
        let reader = self.samples.read_with(|| {
            let mut source = self.source.lock();
            source.restart()?;
            log::info!("building sample cache ({} samples)", source.sample_count());
            Ok(SourceSamples {
                source,
                failed: false,
            })
        })?;
        Ok(reader)
    }

    /// One pass over the spectrum cache; builds the sample cache first if
    /// needed.
    pub fn spectra(&self) -> Result<CacheReader<SpectrumFrame>> {
        let reader = self.spectra.read_with(|| {
            let samples = self.samples()?;
            log::info!(
                "building spectral cache ({} frames)",
                (samples.remaining() as usize).div_ceil(spectral::FRAME_SIZE)
            );
            let analyzer = SpectralAnalyzer::new();
            Ok(analyzer.spectra(samples.map(|r| r.map_err(anyhow::Error::from))))
        })?;
        Ok(reader)
    }

    /// One pass over the subband contrast cache (128 series, subband-major);
    /// builds the upstream caches first if needed.
    pub fn contrast_rows(&self) -> Result<CacheReader<SubbandSeries>> {
        let reader = self.subbands.read_with(|| {
            let spectra = self.spectra()?;
            log::info!("building subband cache (window {})", self.window);
            let rows = subband::extract(
                spectra.map(|r| r.map_err(anyhow::Error::from)),
                self.window,
            )?;
            Ok(rows.into_iter().map(Ok))
        })?;
        Ok(reader)
    }

    /// All subband contrast series collected into memory, in subband order.
    pub fn contrast_series(&self) -> Result<Vec<SubbandSeries>> {
        let rows = self.contrast_rows()?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

/// Adapter that drains a locked sample source into the sample cache builder.
/// Holding the guard for the whole pass keeps the source's read position
/// private to this build.
struct SourceSamples<'a> {
    source: MutexGuard<'a, Box<dyn SampleSource>>,
    failed: bool,
}

impl Iterator for SourceSamples<'_> {
    type Item = Result<StereoSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.source.next_sample() {
            Ok(Some(sample)) => Some(Ok(sample)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DecodeError, MemorySource};
    use super::spectral::FRAME_SIZE;
    use std::sync::Arc;

    fn sine_source(bin: usize, frames: usize, rate: u32) -> Box<dyn SampleSource> {
        let samples = (0..frames * FRAME_SIZE)
            .map(|n| {
                let v =
                    (2.0 * std::f32::consts::PI * bin as f32 * n as f32 / FRAME_SIZE as f32).sin();
                StereoSample::new(v, v)
            })
            .collect();
        Box::new(MemorySource::new(samples, rate))
    }

    #[test]
    fn sample_cache_round_trips_the_source_exactly() {
        let samples: Vec<StereoSample> = (0..5000)
            .map(|n| StereoSample::new((n as f32 * 0.713).sin(), (n as f32 * 0.317).cos()))
            .collect();
        let track = TrackAnalysis::new(
            Box::new(MemorySource::new(samples.clone(), 44100)),
            DEFAULT_WINDOW,
        )
        .unwrap();

        let cached: Vec<StereoSample> =
            track.samples().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(cached.len(), samples.len());
        for (a, b) in cached.iter().zip(&samples) {
            // Bit-exact, not approximate: the cache is a lossless store.
            assert_eq!(a.left.to_bits(), b.left.to_bits());
            assert_eq!(a.right.to_bits(), b.right.to_bits());
        }
    }

    #[test]
    fn repeated_reads_are_bit_identical() {
        let track =
            Arc::new(TrackAnalysis::new(sine_source(5, 8, 44100), DEFAULT_WINDOW).unwrap());

        let first: Vec<SpectrumFrame> =
            track.spectra().unwrap().collect::<Result<_, _>>().unwrap();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let track = Arc::clone(&track);
                std::thread::spawn(move || {
                    track
                        .spectra()
                        .unwrap()
                        .collect::<Result<Vec<_>, _>>()
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            let frames = handle.join().unwrap();
            assert_eq!(frames.len(), first.len());
            for (a, b) in frames.iter().zip(&first) {
                for (x, y) in a.magnitudes.iter().zip(&b.magnitudes) {
                    assert_eq!(x.to_bits(), y.to_bits());
                }
            }
        }
    }

    #[test]
    fn pipeline_produces_subband_major_contrast_rows() {
        let frames = 50;
        let window = 8;
        let track = TrackAnalysis::new(sine_source(16, frames, 44100), window).unwrap();

        let series = track.contrast_series().unwrap();
        assert_eq!(series.len(), subband::SUBBAND_COUNT);
        for band in &series {
            assert_eq!(band.values.len(), frames - window + 1);
        }

        // A steady tone has constant per-frame energy, so contrast is ~zero
        // in the tone's band and exactly zero in silent bands.
        for band in &series {
            assert!(band.values.iter().all(|&v| v.abs() < 1e-6));
        }
    }

    #[test]
    fn silent_track_yields_all_zero_contrast() {
        let samples = vec![StereoSample::new(0.0, 0.0); FRAME_SIZE * 20];
        let track = TrackAnalysis::new(
            Box::new(MemorySource::new(samples, 48000)),
            DEFAULT_WINDOW,
        )
        .unwrap();
        for band in track.contrast_series().unwrap() {
            assert!(band.values.iter().all(|&v| v == 0.0));
        }
    }

    struct FailingSource {
        fail_at: u64,
        pos: u64,
    }

    impl SampleSource for FailingSource {
        fn sample_count(&self) -> u64 {
            self.fail_at * 2
        }
        fn sample_rate(&self) -> u32 {
            44100
        }
        fn restart(&mut self) -> Result<(), DecodeError> {
            self.pos = 0;
            Ok(())
        }
        fn next_sample(&mut self) -> Result<Option<StereoSample>, DecodeError> {
            if self.pos >= self.fail_at {
                return Err(DecodeError::Corrupt("bad packet".into()));
            }
            self.pos += 1;
            Ok(Some(StereoSample::new(0.0, 0.0)))
        }
    }

    #[test]
    fn decode_failure_aborts_the_build_and_propagates() {
        let track = TrackAnalysis::new(
            Box::new(FailingSource { fail_at: 100, pos: 0 }),
            DEFAULT_WINDOW,
        )
        .unwrap();
        assert!(track.samples().is_err());
        // The failed build left nothing behind; a later read fails the same
        // way instead of serving a truncated cache.
        assert!(track.samples().is_err());
    }
}
