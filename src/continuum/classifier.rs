use log::debug;
use serde::Serialize;

use super::baseline::BaselineStatistics;
use super::config::{
    ClassifierConfig, TrimPolicy, PRUNE_DENSE_GROUPS, PRUNE_GROUPS_ABOVE, PRUNE_GROUPS_BELOW,
    PRUNE_WIDTH_FACTOR_DENSE, PRUNE_WIDTH_FACTOR_SPARSE, RELAXED_MAX_TRIM_SCALE, RELAXED_TRIM_FRACTION,
};
use super::selection::{ChannelRange, ChannelSelection};
use super::spectrum::Spectrum;
use super::stats::scaled_mad;

// ---------------------------------------------------------------------------
// Classification result
// ---------------------------------------------------------------------------

/// Which trimming pass produced the final groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrimOutcome {
    Trimmed,
    /// Normal trimming emptied every group; relaxed parameters were used.
    Relaxed,
    /// Even relaxed trimming emptied every group; groups kept untrimmed.
    Untrimmed,
}

/// One-shot channel selection plus the diagnostics the sigma adjuster reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub selection: ChannelSelection,
    pub sigma: f64,
    pub positive_threshold: f64,
    pub negative_threshold: f64,
    pub true_median: f64,
    pub scaled_mad: f64,
    /// Above-threshold groups one channel wide.
    pub single_channel_peaks: usize,
    /// Above-threshold groups wider than one channel.
    pub multi_channel_peaks: usize,
    /// Continuum groups in `selection`.
    pub group_count: usize,
    /// Groups rejected for being narrower than `narrow`.
    pub dropped_narrow: usize,
    /// Valid channels above / below the true median.
    pub above_median: usize,
    pub below_median: usize,
    /// `(max - median) / noise`.
    pub peak_over_mad: f64,
    /// Scaled MAD of the selected channels over the baseline noise.
    pub selection_mad_ratio: f64,
    pub trim: TrimOutcome,
}

impl Classification {
    /// Above/below-median channel count ratio; infinite when nothing is below.
    pub fn skew_ratio(&self) -> f64 {
        if self.below_median == 0 {
            f64::INFINITY
        } else {
            self.above_median as f64 / self.below_median as f64
        }
    }
}

/// `(positive, negative)` thresholds. The negative side is scaled by
/// `negative_factor` so absorption and emission are flagged asymmetrically.
pub fn thresholds(stats: &BaselineStatistics, sigma: f64, negative_factor: f64) -> (f64, f64) {
    let band = sigma * stats.noise();
    (stats.median + band, stats.median - negative_factor * band)
}

/// Valid channels strictly inside the threshold band, minus edge-artifact runs.
pub fn candidate_channels(
    spectrum: &Spectrum,
    sigma: f64,
    stats: &BaselineStatistics,
    negative_factor: f64,
) -> Vec<usize> {
    let (pos, neg) = thresholds(stats, sigma, negative_factor);
    let edges = spectrum.edge_artifact_channels();
    (0..spectrum.len())
        .filter(|&c| spectrum.is_valid(c))
        .filter(|&c| {
            let v = spectrum.value(c);
            v > neg && v < pos
        })
        .filter(|c| edges.binary_search(c).is_err())
        .collect()
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Select continuum channels for one sigma value.
pub fn classify(
    spectrum: &Spectrum,
    sigma: f64,
    stats: &BaselineStatistics,
    config: &ClassifierConfig,
) -> Classification {
    let n = spectrum.len();
    let narrow = config.narrow.resolve(n);
    let (pos, neg) = thresholds(stats, sigma, config.negative_threshold_factor);

    let candidates = candidate_channels(spectrum, sigma, stats, config.negative_threshold_factor);
    let groups: Vec<ChannelRange> = ChannelSelection::from_channels(candidates)
        .ranges()
        .iter()
        .copied()
        .filter(|g| g.width() < 2 || !is_flat(spectrum, g))
        .collect();

    let usable = spectrum.usable_channels();
    let (edge_lo, edge_hi) = match (usable.first(), usable.last()) {
        (Some(&lo), Some(&hi)) => (lo, hi),
        _ => (0, n - 1),
    };

    let trim_params = TrimParams {
        policy: config.trim,
        fraction: config.trim_fraction,
        max_trim: config.max_trim,
        max_fraction: config.max_trim_fraction,
        edge_limit: config.edge_trim_limit,
        edge_lo,
        edge_hi,
    };
    let mut trim = TrimOutcome::Trimmed;
    let mut kept = trim_groups(&groups, &trim_params);
    if kept.is_empty() && !groups.is_empty() {
        let relaxed = TrimParams {
            policy: TrimPolicy::Fraction(RELAXED_TRIM_FRACTION),
            max_trim: (config.max_trim as f64 * RELAXED_MAX_TRIM_SCALE).ceil() as usize,
            ..trim_params
        };
        kept = trim_groups(&groups, &relaxed);
        trim = TrimOutcome::Relaxed;
        if kept.is_empty() {
            debug!("trimming removed all {} groups, keeping them untrimmed", groups.len());
            kept = groups.clone();
            trim = TrimOutcome::Untrimmed;
        } else {
            debug!("trimming removed all groups, relaxed trim kept {}", kept.len());
        }
    }

    let kept = prune_inner_groups(kept);
    let (kept, dropped_narrow) = reject_narrow(kept, narrow);
    let selection = ChannelSelection::from_ranges(kept);

    let (single, multi) = peak_groups(spectrum, pos);
    let valid = spectrum.valid_channels();
    let above_median = valid.iter().filter(|&&c| spectrum.value(c) > stats.median).count();
    let below_median = valid.iter().filter(|&&c| spectrum.value(c) < stats.median).count();

    let noise = stats.noise();
    let peak = valid
        .iter()
        .map(|&c| spectrum.value(c))
        .fold(f64::NEG_INFINITY, f64::max);
    let peak_over_mad = if noise > 0.0 { (peak - stats.median) / noise } else { 0.0 };
    let selection_mad_ratio = if noise > 0.0 && !selection.is_empty() {
        scaled_mad(&spectrum.gather(&selection.channels())) / noise
    } else {
        1.0
    };

    Classification {
        group_count: selection.ranges().len(),
        selection,
        sigma,
        positive_threshold: pos,
        negative_threshold: neg,
        true_median: stats.median,
        scaled_mad: stats.scaled_mad,
        single_channel_peaks: single,
        multi_channel_peaks: multi,
        dropped_narrow,
        above_median,
        below_median,
        peak_over_mad,
        selection_mad_ratio,
        trim,
    }
}

fn is_flat(spectrum: &Spectrum, group: &ChannelRange) -> bool {
    let first = spectrum.value(group.lo);
    (group.lo..=group.hi).all(|c| spectrum.value(c) == first)
}

#[derive(Clone, Copy)]
struct TrimParams {
    policy: TrimPolicy,
    fraction: f64,
    max_trim: usize,
    max_fraction: f64,
    edge_limit: usize,
    edge_lo: usize,
    edge_hi: usize,
}

impl TrimParams {
    fn count(&self, width: usize) -> usize {
        let w = width as f64;
        let raw = match self.policy {
            TrimPolicy::Channels(c) => c,
            TrimPolicy::Auto => ((self.fraction * w).ceil() as usize).min(self.max_trim),
            TrimPolicy::Fraction(f) => ((f * w).ceil() as usize).min(self.max_trim),
        };
        raw.min((self.max_fraction * w).floor() as usize)
    }
}

/// Shave each group's sides; sides on the outer spectrum edge trim at most
/// `edge_limit` channels.
fn trim_groups(groups: &[ChannelRange], p: &TrimParams) -> Vec<ChannelRange> {
    groups
        .iter()
        .filter_map(|g| {
            let t = p.count(g.width());
            let left = if g.lo <= p.edge_lo { t.min(p.edge_limit) } else { t };
            let right = if g.hi >= p.edge_hi { t.min(p.edge_limit) } else { t };
            if left + right >= g.width() {
                None
            } else {
                Some(ChannelRange::new(g.lo + left, g.hi - right))
            }
        })
        .collect()
}

/// With 3..=15 groups, drop inner groups narrower than a fraction of the
/// narrower end group.
fn prune_inner_groups(groups: Vec<ChannelRange>) -> Vec<ChannelRange> {
    let count = groups.len();
    if count <= PRUNE_GROUPS_ABOVE || count >= PRUNE_GROUPS_BELOW {
        return groups;
    }
    let factor = if count < PRUNE_DENSE_GROUPS {
        PRUNE_WIDTH_FACTOR_SPARSE
    } else {
        PRUNE_WIDTH_FACTOR_DENSE
    };
    let min_end = groups[0].width().min(groups[count - 1].width()) as f64;
    let cutoff = factor * min_end;
    groups
        .into_iter()
        .enumerate()
        .filter(|(i, g)| *i == 0 || *i == count - 1 || g.width() as f64 >= cutoff)
        .map(|(_, g)| g)
        .collect()
}

/// Drop groups narrower than `narrow`, unless that would drop them all.
fn reject_narrow(groups: Vec<ChannelRange>, narrow: usize) -> (Vec<ChannelRange>, usize) {
    let wide: Vec<ChannelRange> = groups.iter().copied().filter(|g| g.width() >= narrow).collect();
    if wide.is_empty() {
        (groups, 0)
    } else {
        let dropped = groups.len() - wide.len();
        (wide, dropped)
    }
}

/// `(single-channel, multi-channel)` counts of above-threshold groups.
fn peak_groups(spectrum: &Spectrum, positive: f64) -> (usize, usize) {
    let above = (0..spectrum.len()).filter(|&c| spectrum.is_valid(c) && spectrum.value(c) >= positive);
    let groups = ChannelSelection::from_channels(above);
    let single = groups.ranges().iter().filter(|g| g.width() == 1).count();
    (single, groups.ranges().len() - single)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    use super::*;
    use crate::continuum::config::{BaselineConfig, Narrow};
    use crate::continuum::stats::normal_quantile;

    fn line_spectrum(seed: u64) -> Spectrum {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Normal::new(1.0, 0.1).unwrap();
        let values = (0..200)
            .map(|i| if (90..=110).contains(&i) { 5.0 } else { dist.sample(&mut rng) })
            .collect();
        Spectrum::new(values).unwrap()
    }

    fn no_trim(narrow: usize) -> ClassifierConfig {
        ClassifierConfig {
            narrow: Narrow::Channels(narrow),
            trim: TrimPolicy::Channels(0),
            ..ClassifierConfig::default()
        }
    }

    #[test]
    fn line_is_excluded() {
        let sp = line_spectrum(42);
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
        let cls = classify(&sp, 3.0, &stats, &no_trim(2));
        assert!((90..=110).all(|c| !cls.selection.contains(c)));
        assert!(cls.selection.channels().iter().any(|&c| c < 90));
        assert!(cls.selection.channels().iter().any(|&c| c > 110));
        assert!(cls.selection.channel_count() >= 100, "{}", cls.selection);
        assert!(cls.multi_channel_peaks >= 1);
    }

    /// Same line as `line_spectrum`, but the 179 off-line channels hold an
    /// exact N(1, 0.1) profile in a seed-dependent order.
    fn shuffled_profile_line(seed: u64) -> Spectrum {
        let n = 179;
        let mut profile: Vec<f64> = (0..n)
            .map(|i| 1.0 + 0.1 * normal_quantile((i as f64 + 0.5) / n as f64))
            .collect();
        profile.shuffle(&mut StdRng::seed_from_u64(seed));
        let mut rest = profile.into_iter();
        let values = (0..200)
            .map(|i| if (90..=110).contains(&i) { 5.0 } else { rest.next().unwrap() })
            .collect();
        Spectrum::new(values).unwrap()
    }

    #[test]
    fn line_splits_continuum_in_two() {
        let expected = vec![ChannelRange::new(0, 89), ChannelRange::new(111, 199)];
        for seed in 0..20 {
            let sp = shuffled_profile_line(seed);
            let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
            assert!(stats.noise() > 0.095, "seed {seed}: noise {}", stats.noise());
            let cls = classify(&sp, 3.0, &stats, &no_trim(2));
            assert_eq!(cls.selection.ranges(), expected.as_slice(), "seed {seed}: {}", cls.selection);
        }
    }

    #[test]
    fn line_is_bracketed_for_random_noise() {
        for seed in 0..20 {
            let sp = line_spectrum(seed);
            let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
            let cls = classify(&sp, 3.0, &stats, &no_trim(2));
            let ranges = cls.selection.ranges();
            assert!(ranges.iter().all(|r| r.hi < 90 || r.lo > 110), "seed {seed}: {}", cls.selection);
            assert!(ranges.first().is_some_and(|r| r.hi < 90 && r.lo <= 5), "seed {seed}: {}", cls.selection);
            assert!(ranges.last().is_some_and(|r| r.lo > 110 && r.hi >= 194), "seed {seed}: {}", cls.selection);
        }
    }

    #[test]
    fn reclassifying_is_idempotent() {
        let sp = line_spectrum(5);
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
        let a = classify(&sp, 3.0, &stats, &ClassifierConfig::default());
        let b = classify(&sp, 3.0, &stats, &ClassifierConfig::default());
        assert_eq!(a, b);
    }

    #[test]
    fn auto_trim_spares_outer_edges() {
        let groups = [ChannelRange::new(0, 49), ChannelRange::new(60, 99)];
        let p = TrimParams {
            policy: TrimPolicy::Auto,
            fraction: 0.1,
            max_trim: 20,
            max_fraction: 1.0,
            edge_limit: 2,
            edge_lo: 0,
            edge_hi: 99,
        };
        let out = trim_groups(&groups, &p);
        assert_eq!(out, vec![ChannelRange::new(2, 44), ChannelRange::new(64, 97)]);
    }

    #[test]
    fn trimming_everything_falls_back() {
        let groups = [ChannelRange::new(10, 12), ChannelRange::new(20, 21)];
        let p = TrimParams {
            policy: TrimPolicy::Channels(5),
            fraction: 0.1,
            max_trim: 20,
            max_fraction: 1.0,
            edge_limit: 2,
            edge_lo: 0,
            edge_hi: 99,
        };
        assert!(trim_groups(&groups, &p).is_empty());

        // Narrow isolated groups between big line features.
        let mut values = vec![50.0; 40];
        for (i, v) in values.iter_mut().enumerate() {
            *v += i as f64;
        }
        for c in [10, 11, 12, 20, 21] {
            values[c] = 0.01 * c as f64;
        }
        let sp = Spectrum::new(values).unwrap();
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig {
            size: crate::continuum::config::BaselineSize::Channels(5),
            ..BaselineConfig::default()
        })
        .unwrap();
        let cfg = ClassifierConfig {
            narrow: Narrow::Channels(1),
            trim: TrimPolicy::Channels(5),
            ..ClassifierConfig::default()
        };
        let cls = classify(&sp, 3.0, &stats, &cfg);
        assert!(!cls.selection.is_empty());
        assert_ne!(cls.trim, TrimOutcome::Trimmed);
    }

    #[test]
    fn inner_groups_are_pruned() {
        let groups = vec![
            ChannelRange::new(0, 19),
            ChannelRange::new(30, 32),
            ChannelRange::new(40, 69),
            ChannelRange::new(80, 99),
        ];
        let out = prune_inner_groups(groups);
        assert_eq!(
            out,
            vec![ChannelRange::new(0, 19), ChannelRange::new(40, 69), ChannelRange::new(80, 99)]
        );
        // Two groups: untouched.
        let two = vec![ChannelRange::new(0, 1), ChannelRange::new(5, 50)];
        assert_eq!(prune_inner_groups(two.clone()), two);
    }

    #[test]
    fn narrow_rejection_never_empties() {
        let (kept, dropped) = reject_narrow(vec![ChannelRange::new(0, 0), ChannelRange::new(5, 9)], 2);
        assert_eq!(kept, vec![ChannelRange::new(5, 9)]);
        assert_eq!(dropped, 1);
        let (kept, dropped) = reject_narrow(vec![ChannelRange::new(3, 3)], 4);
        assert_eq!(kept, vec![ChannelRange::new(3, 3)]);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn flat_blocks_are_discarded() {
        let mut rng = StdRng::seed_from_u64(9);
        let dist = Normal::new(0.0, 1.0).unwrap();
        let mut values: Vec<f64> = (0..100).map(|_| dist.sample(&mut rng)).collect();
        values[19] = 100.0;
        values[30] = 100.0;
        for v in values.iter_mut().skip(20).take(10) {
            *v = 0.0;
        }
        let sp = Spectrum::new(values).unwrap();
        let stats = BaselineStatistics::compute(&sp, 3.0, &BaselineConfig::default()).unwrap();
        let cls = classify(&sp, 3.0, &stats, &no_trim(1));
        assert!(is_flat(&sp, &ChannelRange::new(20, 29)));
        assert!((19..=30).all(|c| !cls.selection.contains(c)), "{}", cls.selection);
        assert!(!cls.selection.is_empty());
    }
}
