use std::cmp::Ordering;

use super::subband::SubbandSeries;

/// A time position that stood out from the aggregated contrast series.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OnsetCandidate {
    pub time_ms: f64,
    pub energy: f64,
}

/// Single-pass mean/variance accumulator (Welford). Numerically stable over
/// long series, unlike the naive two-pass sums.
#[derive(Clone, Copy, Debug, Default)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation; zero until two values have been seen.
    pub fn sample_stddev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Average a band range `[offset, offset + count)` across each frame index,
/// then keep every point strictly above mean + one standard deviation.
///
/// Frame indices map to time as `index * duration_ms / series_len`. The
/// result is sorted by energy descending; ties keep their frame order.
pub fn detect(
    series: &[SubbandSeries],
    offset: usize,
    count: usize,
    duration_ms: f64,
) -> Vec<OnsetCandidate> {
    let bands = &series[offset.min(series.len())..(offset + count).min(series.len())];
    if bands.is_empty() {
        return Vec::new();
    }

    let len = bands.iter().map(|b| b.values.len()).min().unwrap_or(0);
    if len == 0 {
        return Vec::new();
    }

    let mut aggregate = Vec::with_capacity(len);
    let mut stats = Welford::default();
    for i in 0..len {
        let value = bands.iter().map(|b| b.values[i]).sum::<f64>() / bands.len() as f64;
        stats.push(value);
        aggregate.push(value);
    }

    let threshold = stats.mean() + stats.sample_stddev();
    let frame_ms = duration_ms / len as f64;

    let mut candidates: Vec<OnsetCandidate> = aggregate
        .into_iter()
        .enumerate()
        .filter(|&(_, value)| value > threshold)
        .map(|(i, value)| OnsetCandidate {
            time_ms: i as f64 * frame_ms,
            energy: value,
        })
        .collect();

    // Stable sort: equal energies stay in frame order.
    candidates.sort_by(|a, b| b.energy.partial_cmp(&a.energy).unwrap_or(Ordering::Equal));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(values: Vec<f64>) -> SubbandSeries {
        SubbandSeries { values }
    }

    #[test]
    fn welford_matches_closed_form() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = Welford::default();
        for v in values {
            stats.push(v);
        }
        assert!((stats.mean() - 5.0).abs() < 1e-12);
        // Sample variance of this set is 32/7.
        assert!((stats.sample_stddev() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn constant_series_has_no_candidates() {
        // stddev is zero and the threshold test is strict, so nothing passes.
        let series = vec![band(vec![1.0; 64])];
        assert!(detect(&series, 0, 1, 1000.0).is_empty());
    }

    #[test]
    fn single_spike_is_the_only_candidate() {
        let mut values = vec![0.0; 100];
        values[40] = 10.0;
        let series = vec![band(values)];
        let candidates = detect(&series, 0, 1, 10_000.0);
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].time_ms - 4000.0).abs() < 1e-9);
        assert!((candidates[0].energy - 10.0).abs() < 1e-12);
    }

    #[test]
    fn candidates_rank_by_energy_descending() {
        let mut values = vec![0.0; 100];
        values[10] = 5.0;
        values[20] = 9.0;
        values[30] = 7.0;
        let series = vec![band(values)];
        let candidates = detect(&series, 0, 1, 1000.0);
        let energies: Vec<f64> = candidates.iter().map(|c| c.energy).collect();
        assert_eq!(energies, vec![9.0, 7.0, 5.0]);
    }

    #[test]
    fn ties_keep_frame_order() {
        let mut values = vec![0.0; 100];
        values[60] = 8.0;
        values[15] = 8.0;
        values[90] = 8.0;
        let series = vec![band(values)];
        let candidates = detect(&series, 0, 1, 100_000.0);
        let times: Vec<f64> = candidates.iter().map(|c| c.time_ms).collect();
        assert_eq!(times, vec![15_000.0, 60_000.0, 90_000.0]);
    }

    #[test]
    fn band_range_averages_selected_bands_only() {
        let mut spiky = vec![0.0; 50];
        spiky[25] = 6.0;
        let series = vec![
            band(vec![100.0; 50]), // excluded by the offset
            band(spiky.clone()),
            band(spiky),
        ];
        let candidates = detect(&series, 1, 2, 5000.0);
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].energy - 6.0).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_band_selection_is_empty() {
        let series = vec![band(vec![1.0; 10])];
        assert!(detect(&series, 5, 3, 1000.0).is_empty());
    }
}
