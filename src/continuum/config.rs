use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Named defaults
// ---------------------------------------------------------------------------

/// Baseline subset as a percentage of the valid channels.
pub const DEFAULT_BASELINE_PERCENT: f64 = 19.0;
pub const MIN_BASELINE_CHANNELS: usize = 2;
/// `high` / `middle` must beat `low` by this factor to be chosen.
pub const LOOK_AHEAD_FACTOR: f64 = 1.5;
/// Percentage of the valid channels dropped from the extreme end of the subset.
pub const DROP_EXTREME_PERCENT: f64 = 2.0;
pub const MAD_RATIO_LOWER_LIMIT: f64 = 1.15;
pub const MAD_RATIO_UPPER_LIMIT: f64 = 1.5;
/// signalRatio is measured beyond this many effective sigma.
pub const SIGNAL_RATIO_MULTIPLIER: f64 = 2.0;
/// Deeper second look when the first reports (almost) no signal.
pub const SIGNAL_RATIO_DEEP_MULTIPLIER: f64 = 1.0;
pub const SIGNAL_RATIO_DEEP_TRIGGER: f64 = 0.99;

pub const NEGATIVE_THRESHOLD_FACTOR: f64 = 1.15;
pub const TRIM_FRACTION: f64 = 0.1;
pub const MAX_TRIM: usize = 20;
pub const MAX_TRIM_FRACTION: f64 = 1.0;
pub const EDGE_TRIM_LIMIT: usize = 2;
pub const RELAXED_TRIM_FRACTION: f64 = 0.1;
pub const RELAXED_MAX_TRIM_SCALE: f64 = 1.5;
/// Inner-group pruning applies when the group count lies strictly between these.
pub const PRUNE_GROUPS_ABOVE: usize = 2;
pub const PRUNE_GROUPS_BELOW: usize = 16;
pub const PRUNE_DENSE_GROUPS: usize = 8;
pub const PRUNE_WIDTH_FACTOR_SPARSE: f64 = 1.0;
pub const PRUNE_WIDTH_FACTOR_DENSE: f64 = 0.2;

pub const SIGMA_FDM: f64 = 3.5;
pub const SIGMA_TDM: f64 = 6.5;
pub const SINGLETON_SIGMA_FACTOR: f64 = 1.5;
pub const MANY_GROUPS: usize = 8;
pub const SKEW_UPPER: f64 = 1.0;
pub const SKEW_LOWER: f64 = 0.5;
pub const SKEW_MAX_FACTOR: f64 = 2.0;
pub const MAD_RATIO_CUTOFF: f64 = 1.2;
pub const LINE_SNR_CUTOFF: f64 = 20.0;
pub const LOWER_SIGMA_MIN_GROUPS: usize = 1;
pub const LOWER_SIGMA_RATIO: f64 = 5.0 / 7.0;
pub const LOWER_SIGMA_RATIO_AUTO_LOWER: f64 = 6.0 / 7.0;
pub const LOWER_SIGMA_GROUP_CEILING: usize = 15;
pub const MAX_SIGMA_RERUNS: usize = 2;
pub const DETREND_IMPROVEMENT: f64 = 1.6;

pub const AMENDMENT_BUDGET: usize = 2;
pub const MAX_AMENDMENT_BUDGET: usize = 3;
pub const AUTO_LOWER_FRACTION: f64 = 0.85;
pub const SAME_THRESHOLD: f64 = 0.1;
pub const LOOSE_SAME_THRESHOLD: f64 = 0.2;
pub const LOW_BANDWIDTH_FRACTION: f64 = 1.0 / 16.0;
pub const LOW_SPREAD_FRACTION: f64 = 1.0 / 3.0;
pub const NOISE_SEED: u64 = 0x5EED_C0DE;

pub const RUNAWAY_PIXEL_RATIO: f64 = 2.2;
pub const PIXEL_FLOOR: usize = 9;
pub const TEN_EVENTS: f64 = 10.0;
/// Sigma step between the two adjacent levels of the runaway guard.
pub const ADJACENT_LEVEL_STEP: f64 = 1.0;

// ---------------------------------------------------------------------------
// Component configuration
// ---------------------------------------------------------------------------

/// Size of the baseline subset: absolute channel count or percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BaselineSize {
    Channels(usize),
    Percent(f64),
}

impl BaselineSize {
    /// Resolve against the number of usable channels. A percentage never
    /// resolves below the two channels a MAD needs, when that many exist.
    pub fn resolve(self, available: usize) -> usize {
        match self {
            BaselineSize::Channels(k) => k,
            BaselineSize::Percent(p) => {
                let k = (p / 100.0 * available as f64).round() as usize;
                k.max(MIN_BASELINE_CHANNELS.min(available))
            }
        }
    }
}

impl Default for BaselineSize {
    fn default() -> Self {
        BaselineSize::Percent(DEFAULT_BASELINE_PERCENT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub size: BaselineSize,
    pub look_ahead_factor: f64,
    /// `None` disables the drop-extreme check.
    pub drop_extreme_percent: Option<f64>,
    pub mad_ratio_lower: f64,
    pub mad_ratio_upper: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            size: BaselineSize::default(),
            look_ahead_factor: LOOK_AHEAD_FACTOR,
            drop_extreme_percent: Some(DROP_EXTREME_PERCENT),
            mad_ratio_lower: MAD_RATIO_LOWER_LIMIT,
            mad_ratio_upper: MAD_RATIO_UPPER_LIMIT,
        }
    }
}

/// How many channels to shave off each side of a continuum group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrimPolicy {
    /// `ceil(trim_fraction * width)`, at most `max_trim`.
    Auto,
    /// Exactly this many per side (0 disables trimming).
    Channels(usize),
    /// `ceil(fraction * width)`, at most `max_trim`.
    Fraction(f64),
}

impl Default for TrimPolicy {
    fn default() -> Self {
        TrimPolicy::Auto
    }
}

/// Minimum width of a continuum group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Narrow {
    Auto,
    Channels(usize),
}

impl Default for Narrow {
    fn default() -> Self {
        Narrow::Auto
    }
}

impl Narrow {
    pub fn resolve(self, nchan: usize) -> usize {
        match self {
            Narrow::Channels(n) => n.max(1),
            Narrow::Auto => pick_narrow(nchan),
        }
    }
}

/// `max(2, round(log2(nchan / 8)))`: 4 for 128 channels, 8 for 2048.
pub fn pick_narrow(nchan: usize) -> usize {
    let v = (nchan as f64 / 8.0).max(1.0).log2().round() as usize;
    v.max(2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub narrow: Narrow,
    pub trim: TrimPolicy,
    pub trim_fraction: f64,
    pub max_trim: usize,
    pub max_trim_fraction: f64,
    pub edge_trim_limit: usize,
    pub negative_threshold_factor: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            narrow: Narrow::default(),
            trim: TrimPolicy::default(),
            trim_fraction: TRIM_FRACTION,
            max_trim: MAX_TRIM,
            max_trim_fraction: MAX_TRIM_FRACTION,
            edge_trim_limit: EDGE_TRIM_LIMIT,
            negative_threshold_factor: NEGATIVE_THRESHOLD_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendOrder {
    Linear,
    Quadratic,
}

impl TrendOrder {
    pub fn degree(self) -> usize {
        match self {
            TrendOrder::Linear => 1,
            TrendOrder::Quadratic => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigmaConfig {
    /// Explicit starting sigma; `None` picks from the TDM/FDM regime.
    pub initial: Option<f64>,
    pub fdm: f64,
    pub tdm: f64,
    pub singleton_factor: f64,
    pub many_groups: usize,
    pub skew_upper: f64,
    pub skew_lower: f64,
    pub skew_max_factor: f64,
    pub mad_ratio_cutoff: f64,
    pub line_snr_cutoff: f64,
    pub lower_min_groups: usize,
    pub lower_ratio: f64,
    pub lower_ratio_auto_lower: f64,
    pub lower_group_ceiling: usize,
    pub max_reruns: usize,
    pub detrend: Option<TrendOrder>,
    pub detrend_improvement: f64,
}

impl Default for SigmaConfig {
    fn default() -> Self {
        Self {
            initial: None,
            fdm: SIGMA_FDM,
            tdm: SIGMA_TDM,
            singleton_factor: SINGLETON_SIGMA_FACTOR,
            many_groups: MANY_GROUPS,
            skew_upper: SKEW_UPPER,
            skew_lower: SKEW_LOWER,
            skew_max_factor: SKEW_MAX_FACTOR,
            mad_ratio_cutoff: MAD_RATIO_CUTOFF,
            line_snr_cutoff: LINE_SNR_CUTOFF,
            lower_min_groups: LOWER_SIGMA_MIN_GROUPS,
            lower_ratio: LOWER_SIGMA_RATIO,
            lower_ratio_auto_lower: LOWER_SIGMA_RATIO_AUTO_LOWER,
            lower_group_ceiling: LOWER_SIGMA_GROUP_CEILING,
            max_reruns: MAX_SIGMA_RERUNS,
            detrend: None,
            detrend_improvement: DETREND_IMPROVEMENT,
        }
    }
}

impl SigmaConfig {
    /// Starting sigma for a coarse (TDM-like) or fine (FDM-like) setup.
    pub fn starting_sigma(&self, tdm: bool) -> f64 {
        match self.initial {
            Some(s) => s,
            None if tdm => self.tdm,
            None => self.fdm,
        }
    }
}

/// Fixed thresholds for one decision stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageThresholds {
    /// SNR of the relevant map that must be exceeded.
    pub snr: f64,
    /// Lowest sigma used to set the mask/synthesis level.
    pub sigma_floor: f64,
    /// Largest tolerated negative / (negative + positive) pixel fraction.
    pub negative_fraction: f64,
    /// Cube SNR needed by the only-extra-mask stage.
    pub cube_snr: f64,
}

/// One table per atmosphere regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionTable {
    pub amend_mask: StageThresholds,
    pub extra_mask: StageThresholds,
    pub only_extra_mask: StageThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub normal: DecisionTable,
    pub atmospheric: DecisionTable,
    pub runaway_pixel_ratio: f64,
    pub pixel_floor: usize,
    pub events: f64,
    pub adjacent_level_step: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            normal: DecisionTable {
                amend_mask: StageThresholds {
                    snr: 5.0,
                    sigma_floor: 4.0,
                    negative_fraction: 0.35,
                    cube_snr: 8.0,
                },
                extra_mask: StageThresholds {
                    snr: 6.5,
                    sigma_floor: 5.0,
                    negative_fraction: 0.35,
                    cube_snr: 8.0,
                },
                only_extra_mask: StageThresholds {
                    snr: 6.0,
                    sigma_floor: 5.0,
                    negative_fraction: 0.3,
                    cube_snr: 5.0,
                },
            },
            atmospheric: DecisionTable {
                amend_mask: StageThresholds {
                    snr: 6.0,
                    sigma_floor: 4.5,
                    negative_fraction: 0.3,
                    cube_snr: 9.0,
                },
                extra_mask: StageThresholds {
                    snr: 7.0,
                    sigma_floor: 5.5,
                    negative_fraction: 0.3,
                    cube_snr: 9.0,
                },
                only_extra_mask: StageThresholds {
                    snr: 6.5,
                    sigma_floor: 5.5,
                    negative_fraction: 0.25,
                    cube_snr: 6.0,
                },
            },
            runaway_pixel_ratio: RUNAWAY_PIXEL_RATIO,
            pixel_floor: PIXEL_FLOOR,
            events: TEN_EVENTS,
            adjacent_level_step: ADJACENT_LEVEL_STEP,
        }
    }
}

impl DecisionConfig {
    pub fn table(&self, atmospheric_issue: bool) -> &DecisionTable {
        if atmospheric_issue {
            &self.atmospheric
        } else {
            &self.normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmendmentConfig {
    /// Extra stages after `Original`, clamped to `0..=3`.
    pub budget: usize,
    pub auto_lower_fraction: f64,
    pub same_threshold: f64,
    pub loose_same_threshold: f64,
    pub all_worse: Vec<String>,
    pub low_bandwidth_fraction: f64,
    pub low_spread_fraction: f64,
    pub noise_seed: u64,
}

impl Default for AmendmentConfig {
    fn default() -> Self {
        Self {
            budget: AMENDMENT_BUDGET,
            auto_lower_fraction: AUTO_LOWER_FRACTION,
            same_threshold: SAME_THRESHOLD,
            loose_same_threshold: LOOSE_SAME_THRESHOLD,
            all_worse: vec!["HHHH".to_string(), "HHHS".to_string()],
            low_bandwidth_fraction: LOW_BANDWIDTH_FRACTION,
            low_spread_fraction: LOW_SPREAD_FRACTION,
            noise_seed: NOISE_SEED,
        }
    }
}

impl AmendmentConfig {
    pub fn effective_budget(&self) -> usize {
        self.budget.min(MAX_AMENDMENT_BUDGET)
    }
}

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

/// Immutable configuration passed to every component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindContinuumConfig {
    pub baseline: BaselineConfig,
    pub classifier: ClassifierConfig,
    pub sigma: SigmaConfig,
    pub decision: DecisionConfig,
    pub amendment: AmendmentConfig,
}

impl FindContinuumConfig {
    /// Parse a (possibly partial) JSON configuration; missing keys default.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_size_resolves() {
        assert_eq!(BaselineSize::Channels(16).resolve(1000), 16);
        assert_eq!(BaselineSize::Percent(19.0).resolve(200), 38);
        assert_eq!(BaselineSize::Percent(19.0).resolve(7), 2);
        assert_eq!(BaselineSize::Percent(19.0).resolve(2), 2);
        assert_eq!(BaselineSize::Percent(19.0).resolve(1), 1);
        assert_eq!(BaselineSize::Channels(1).resolve(7), 1);
    }

    #[test]
    fn narrow_auto_scales_with_channels() {
        assert_eq!(pick_narrow(16), 2);
        assert_eq!(pick_narrow(128), 4);
        assert_eq!(pick_narrow(2048), 8);
        assert_eq!(Narrow::Channels(0).resolve(100), 1);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = FindContinuumConfig::from_json(
            r#"{ "amendment": { "budget": 7 }, "sigma": { "initial": 4.0 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.amendment.effective_budget(), 3);
        assert_eq!(cfg.sigma.starting_sigma(true), 4.0);
        assert_eq!(cfg.classifier, ClassifierConfig::default());
    }

    #[test]
    fn starting_sigma_by_regime() {
        let s = SigmaConfig::default();
        assert_eq!(s.starting_sigma(false), SIGMA_FDM);
        assert_eq!(s.starting_sigma(true), SIGMA_TDM);
    }
}
