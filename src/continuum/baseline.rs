use log::debug;
use serde::Serialize;

use super::config::BaselineConfig;
use super::config::{SIGNAL_RATIO_DEEP_MULTIPLIER, SIGNAL_RATIO_DEEP_TRIGGER, SIGNAL_RATIO_MULTIPLIER};
use super::error::{ContinuumError, ContinuumResult};
use super::spectrum::Spectrum;
use super::stats::{gaussian_slice_mad, mad, median, min_max, MAD_TO_SIGMA};

// ---------------------------------------------------------------------------
// Which slice of the value-sorted channels estimates the noise
// ---------------------------------------------------------------------------

/// `Low` suits emission spectra, `High` absorption spectra, `Middle` spectra
/// with both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubsetMode {
    Low,
    High,
    Middle,
}

/// Robust noise and level estimate of one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineStatistics {
    /// Population-level median after bias correction.
    pub median: f64,
    /// Plain median of the chosen subset.
    pub subset_median: f64,
    /// `MAD(subset) * 1.4826`.
    pub scaled_mad: f64,
    pub correction_factor: f64,
    pub median_correction_factor: f64,
    /// `(1 - fraction of channels beyond 2 effective sigma)^2`, in `[0, 1]`.
    pub signal_ratio: f64,
    pub used_subset: SubsetMode,
    /// Subset size as a percentage of the baseline population.
    pub percentile: f64,
    /// Channels of the chosen subset, ascending.
    pub subset_channels: Vec<usize>,
    pub dropped_extremes: bool,
    /// The corrected median left the data range; the sample median is used.
    pub median_fallback: bool,
}

impl BaselineStatistics {
    /// Noise estimate for the whole spectrum: `scaled_mad * correction_factor`.
    pub fn noise(&self) -> f64 {
        self.scaled_mad * self.correction_factor
    }

    /// Estimate statistics from a spectrum.
    ///
    /// `sigma` only enters the `signal_ratio` diagnostic.
    pub fn compute(spectrum: &Spectrum, sigma: f64, config: &BaselineConfig) -> ContinuumResult<Self> {
        let mut usable = spectrum.usable_channels();
        if usable.len() < 2 {
            usable = spectrum.valid_channels();
        }
        let requested = config.size.resolve(usable.len());
        if requested < 2 || usable.len() < 2 {
            return Err(ContinuumError::TooFewBaselineChannels {
                requested,
                available: usable.len(),
            });
        }

        let mut population = usable.clone();
        population.sort_by(|&a, &b| spectrum.value(a).total_cmp(&spectrum.value(b)));

        let mut k = requested.min(population.len());
        let mut pick = choose_subset(spectrum, &population, k, config.look_ahead_factor);

        if pick.mad == 0.0 {
            let repeated = median(&spectrum.gather(&pick.channels));
            let filtered: Vec<usize> = population
                .iter()
                .copied()
                .filter(|&c| spectrum.value(c) != repeated)
                .collect();
            if filtered.len() >= 2 {
                debug!(
                    "zero MAD in {:?} subset, excluding {} channels at value {repeated}",
                    pick.mode,
                    population.len() - filtered.len()
                );
                population = filtered;
                k = k.min(population.len());
                pick = choose_subset(spectrum, &population, k, config.look_ahead_factor);
            }
        }

        // The median always comes from the full subset; dropping extremes only
        // touches the MAD, rescaled to the full-subset equivalent.
        let subset_median = median(&spectrum.gather(&pick.channels));
        let mut mad_scale = 1.0;
        let mut dropped_extremes = false;
        if let Some(pct) = config.drop_extreme_percent {
            let d = (pct / 100.0 * population.len() as f64).floor() as usize;
            if d > 0 && pick.mode != SubsetMode::Middle && k >= d + 2 {
                let kept: Vec<usize> = match pick.mode {
                    SubsetMode::Low => pick.channels[d..].to_vec(),
                    _ => pick.channels[..k - d].to_vec(),
                };
                let dropped_mad = mad(&spectrum.gather(&kept));
                if dropped_mad > 0.0 {
                    let ratio = pick.mad / dropped_mad;
                    if ratio > config.mad_ratio_lower && ratio < config.mad_ratio_upper {
                        debug!("dropping {d} extreme channels: MAD ratio {ratio:.3}");
                        let n = population.len() as f64;
                        mad_scale = gaussian_slice_mad(0.0, k as f64 / n)
                            / gaussian_slice_mad(d as f64 / n, k as f64 / n);
                        pick.channels = kept;
                        pick.mad = dropped_mad;
                        dropped_extremes = true;
                    }
                }
            }
        }

        let percentile = 100.0 * k as f64 / population.len() as f64;
        let correction_factor = sigma_correction_factor(pick.mode, percentile, k);
        let median_correction_factor = median_correction_factor(pick.mode, percentile, k);

        let scaled_mad = pick.mad * MAD_TO_SIGMA * mad_scale;
        let offset = median_correction_factor * scaled_mad;
        let mut true_median = match pick.mode {
            SubsetMode::Low => subset_median + offset,
            SubsetMode::High => subset_median - offset,
            SubsetMode::Middle => subset_median,
        };

        let usable_values = spectrum.gather(&usable);
        let mut median_fallback = false;
        if let Some((lo, hi)) = min_max(&usable_values) {
            if true_median < lo || true_median > hi {
                debug!("corrected median {true_median} outside [{lo}, {hi}], using sample median");
                true_median = median(&usable_values);
                median_fallback = true;
            }
        }

        let noise = scaled_mad * correction_factor;
        let mut signal_ratio = ratio_within(&usable_values, true_median, sigma * noise * SIGNAL_RATIO_MULTIPLIER);
        if signal_ratio >= SIGNAL_RATIO_DEEP_TRIGGER {
            // Nothing beyond the wide band: look again for weak lines.
            signal_ratio = ratio_within(&usable_values, true_median, sigma * noise * SIGNAL_RATIO_DEEP_MULTIPLIER);
        }

        let mut subset_channels = pick.channels;
        subset_channels.sort_unstable();

        Ok(Self {
            median: true_median,
            subset_median,
            scaled_mad,
            correction_factor,
            median_correction_factor,
            signal_ratio,
            used_subset: pick.mode,
            percentile,
            subset_channels,
            dropped_extremes,
            median_fallback,
        })
    }
}

struct Candidate {
    mode: SubsetMode,
    /// In ascending value order.
    channels: Vec<usize>,
    mad: f64,
}

fn choose_subset(spectrum: &Spectrum, sorted: &[usize], k: usize, look_ahead: f64) -> Candidate {
    let n = sorted.len();
    let mad_of = |chans: &[usize]| mad(&spectrum.gather(chans));

    let low = &sorted[..k];
    let mut best = Candidate {
        mode: SubsetMode::Low,
        channels: low.to_vec(),
        mad: mad_of(low),
    };
    let mut best_score = best.mad;

    let high = &sorted[n - k..];
    let high_mad = mad_of(high);
    if look_ahead * high_mad < best_score {
        best_score = look_ahead * high_mad;
        best = Candidate {
            mode: SubsetMode::High,
            channels: high.to_vec(),
            mad: high_mad,
        };
    }

    if n >= 2 * k + 2 {
        let middle = &sorted[k..n - k];
        let middle_mad = mad_of(middle);
        if look_ahead * middle_mad < best_score {
            best = Candidate {
                mode: SubsetMode::Middle,
                channels: middle.to_vec(),
                mad: middle_mad,
            };
        }
    }
    best
}

fn ratio_within(values: &[f64], center: f64, limit: f64) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let beyond = values.iter().filter(|&&v| (v - center).abs() > limit).count();
    let r = 1.0 - beyond as f64 / values.len() as f64;
    (r * r).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Order-statistic bias corrections
// ---------------------------------------------------------------------------

// ln(cf) = a + b ln p + c ln^2 p for the lowest/highest p percent of a
// Gaussian population, 5 <= p <= 50.
const EXTREME_SIGMA_COEFFS: [f64; 3] = [1.158, 0.1244, -0.07278];
// ln(mcf), same form.
const EXTREME_MEDIAN_COEFFS: [f64; 3] = [1.541, 0.5503, -0.2305];
// cf = a * c^b for the central c percent.
const MIDDLE_SIGMA_SCALE: f64 = 121.8;
const MIDDLE_SIGMA_EXPONENT: f64 = -1.04;
// Small-sample term: the subset MAD of k sorted Gaussian draws falls short
// of the slice MAD by about 4.5/k (0.91 of it at k = 38, 0.67 at k = 10).
const FINITE_SAMPLE_TERM: f64 = 4.5;

fn log_quadratic(coeffs: &[f64; 3], percentile: f64) -> f64 {
    let l = percentile.max(1.0).ln();
    (coeffs[0] + coeffs[1] * l + coeffs[2] * l * l).exp()
}

fn finite_sample(k: usize) -> f64 {
    1.0 + FINITE_SAMPLE_TERM / k.max(2) as f64
}

/// Converts the scaled MAD of a biased subset into the population sigma.
pub fn sigma_correction_factor(mode: SubsetMode, percentile: f64, k: usize) -> f64 {
    let base = match mode {
        SubsetMode::Low | SubsetMode::High => {
            if percentile >= 100.0 {
                1.0
            } else if percentile > 50.0 {
                let at_half = log_quadratic(&EXTREME_SIGMA_COEFFS, 50.0);
                1.0 + (at_half - 1.0) * (100.0 - percentile) / 50.0
            } else {
                log_quadratic(&EXTREME_SIGMA_COEFFS, percentile)
            }
        }
        SubsetMode::Middle => {
            let central = (100.0 - 2.0 * percentile).max(1.0);
            (MIDDLE_SIGMA_SCALE * central.powf(MIDDLE_SIGMA_EXPONENT)).max(1.0)
        }
    };
    base * finite_sample(k)
}

/// Distance from the subset median to the population median, in units of
/// the subset's scaled MAD. Zero for the middle subset.
pub fn median_correction_factor(mode: SubsetMode, percentile: f64, k: usize) -> f64 {
    let base = match mode {
        SubsetMode::Middle => return 0.0,
        _ if percentile >= 100.0 => 0.0,
        _ if percentile > 50.0 => {
            log_quadratic(&EXTREME_MEDIAN_COEFFS, 50.0) * (100.0 - percentile) / 50.0
        }
        _ => log_quadratic(&EXTREME_MEDIAN_COEFFS, percentile),
    };
    base * finite_sample(k)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    use super::*;
    use crate::continuum::config::BaselineSize;

    fn noise(n: usize, level: f64, sigma: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Normal::new(level, sigma).unwrap();
        (0..n).map(|_| dist.sample(&mut rng)).collect()
    }

    #[test]
    fn corrections_are_monotone_in_percentile() {
        let k = 1000;
        let cf5 = sigma_correction_factor(SubsetMode::Low, 5.0, k);
        let cf19 = sigma_correction_factor(SubsetMode::Low, 19.0, k);
        let cf50 = sigma_correction_factor(SubsetMode::Low, 50.0, k);
        assert!(cf5 > cf19 && cf19 > cf50 && cf50 > 1.0);
        assert!((sigma_correction_factor(SubsetMode::Low, 100.0, k) - finite_sample(k)).abs() < 1e-12);
        assert_eq!(median_correction_factor(SubsetMode::Middle, 19.0, k), 0.0);
        assert!(median_correction_factor(SubsetMode::High, 10.0, k) > median_correction_factor(SubsetMode::High, 40.0, k));
    }

    #[test]
    fn pure_noise_recovers_level_and_sigma() {
        let sp = Spectrum::new(noise(2000, 10.0, 0.5, 7)).unwrap();
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
        assert!((stats.median - 10.0).abs() < 0.15, "median {}", stats.median);
        assert!((stats.noise() - 0.5).abs() < 0.1, "noise {}", stats.noise());
        assert!(stats.signal_ratio > 0.9);
    }

    #[test]
    fn small_population_noise_is_unbiased() {
        // 200 channels, 21 of them a bright line: the low subset keeps 38.
        let mut estimates: Vec<f64> = (0..64)
            .map(|seed| {
                let mut v = noise(200, 1.0, 0.1, seed);
                for x in v.iter_mut().skip(90).take(21) {
                    *x = 5.0;
                }
                let sp = Spectrum::new(v).unwrap();
                BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap().noise()
            })
            .collect();
        estimates.sort_by(f64::total_cmp);
        let typical = median(&estimates);
        assert!((typical - 0.1).abs() < 0.01, "median noise {typical}");
        assert!(estimates[3] > 0.05, "low tail {}", estimates[3]);
    }

    #[test]
    fn emission_prefers_low_and_absorption_prefers_high() {
        let mut em = noise(400, 0.0, 1.0, 11);
        for (i, v) in em.iter_mut().enumerate() {
            let x = i as f64 - 200.0;
            *v += 30.0 * (-x * x / (2.0 * 25.0 * 25.0)).exp();
        }
        let sp = Spectrum::new(em).unwrap();
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
        assert_ne!(stats.used_subset, SubsetMode::High);
        assert!(stats.median.abs() < 1.0);
        assert!(stats.signal_ratio < 0.9);

        let mut ab = noise(400, 0.0, 1.0, 12);
        for (i, v) in ab.iter_mut().enumerate() {
            let x = i as f64 - 200.0;
            *v -= 30.0 * (-x * x / (2.0 * 40.0 * 40.0)).exp();
        }
        let sp = Spectrum::new(ab).unwrap();
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
        assert_eq!(stats.used_subset, SubsetMode::High);
    }

    #[test]
    fn too_few_baseline_channels_is_fatal() {
        let sp = Spectrum::new(noise(50, 0.0, 1.0, 1)).unwrap();
        let cfg = BaselineConfig {
            size: BaselineSize::Channels(1),
            ..BaselineConfig::default()
        };
        assert!(matches!(
            BaselineStatistics::compute(&sp, 3.0, &cfg),
            Err(ContinuumError::TooFewBaselineChannels { requested: 1, .. })
        ));
    }

    #[test]
    fn short_spectrum_keeps_two_baseline_channels() {
        let sp = Spectrum::new(vec![1.0, 1.2, 0.9, 1.1, 1.05, 0.95, 1.15]).unwrap();
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
        assert_eq!(stats.subset_channels.len(), 2);
        assert!(stats.noise() > 0.0);
    }

    #[test]
    fn zero_mad_block_is_excluded() {
        let mut v = noise(200, 1.0, 0.1, 3);
        for x in v.iter_mut().skip(20).take(60) {
            *x = 0.0;
        }
        let sp = Spectrum::new(v).unwrap();
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
        assert!(stats.scaled_mad > 0.0);
        assert!(stats.subset_channels.iter().all(|&c| !(20..80).contains(&c)));
    }
}
