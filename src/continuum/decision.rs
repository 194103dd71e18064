use std::fmt;

use log::debug;
use serde::Serialize;

use super::config::{DecisionConfig, StageThresholds};
use super::diagnostics::{CountLevels, MapSnapshot, PixelCounts};
use super::stats::ten_event_sigma;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DecisionKind {
    No,
    /// Significant in the moment (signal / difference) map.
    YesMom,
    /// Marginal in the moment map but significant in the raw cube.
    YesCube,
    /// The rerun reproduced the previous channel list.
    NoImprovement,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => write!(f, "No"),
            Self::YesMom => write!(f, "YesMom"),
            Self::YesCube => write!(f, "YesCube"),
            Self::NoImprovement => write!(f, "NoImprovement"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    pub kind: DecisionKind,
    /// Intensity level for mask growth / spectrum synthesis.
    pub level: f64,
    pub sigma_used: f64,
}

impl Decision {
    pub fn no() -> Self {
        Self {
            kind: DecisionKind::No,
            level: f64::NAN,
            sigma_used: f64::NAN,
        }
    }

    pub fn is_yes(&self) -> bool {
        matches!(self.kind, DecisionKind::YesMom | DecisionKind::YesCube)
    }

    /// Same level and sigma, demoted after an identical rerun.
    pub fn no_improvement(self) -> Self {
        Self {
            kind: DecisionKind::NoImprovement,
            ..self
        }
    }
}

/// Which of the three evaluators is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DecisionStage {
    AmendMask,
    ExtraMask,
    OnlyExtraMask,
}

impl DecisionStage {
    fn thresholds(self, config: &DecisionConfig, atmospheric_issue: bool) -> StageThresholds {
        let table = config.table(atmospheric_issue);
        match self {
            DecisionStage::AmendMask => table.amend_mask,
            DecisionStage::ExtraMask => table.extra_mask,
            DecisionStage::OnlyExtraMask => table.only_extra_mask,
        }
    }
}

// ---------------------------------------------------------------------------
// Significance level and pixel-count levels
// ---------------------------------------------------------------------------

/// Sigma and count levels a stage evaluates a map at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Significance {
    /// `max(floor, ten-event sigma of the map population)`.
    pub sigma_used: f64,
    pub level: f64,
    pub levels: CountLevels,
}

pub fn significance(
    stage: DecisionStage,
    atmospheric_issue: bool,
    snapshot: &MapSnapshot,
    config: &DecisionConfig,
) -> Significance {
    let th = stage.thresholds(config, atmospheric_issue);
    let sigma_used = th.sigma_floor.max(ten_event_sigma(snapshot.population, config.events));
    let levels = CountLevels {
        upper: snapshot.level(sigma_used),
        lower: snapshot.level(sigma_used - config.adjacent_level_step),
        negative: snapshot.level(-sigma_used),
    };
    Significance {
        sigma_used,
        level: levels.upper,
        levels,
    }
}

// ---------------------------------------------------------------------------
// Evaluators
// ---------------------------------------------------------------------------

/// Inputs shared by the three evaluators.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorInput<'a> {
    pub atmospheric_issue: bool,
    pub snapshot: &'a MapSnapshot,
    /// Counts at the levels from [`significance`]; `None` when unavailable.
    pub counts: Option<PixelCounts>,
    pub cube_snr: Option<f64>,
}

/// Should the joint mask be grown? Judged on the signal map.
pub fn amend_mask_yes_or_no(input: &EvaluatorInput<'_>, config: &DecisionConfig) -> Decision {
    evaluate(DecisionStage::AmendMask, input, config)
}

/// Is residual emission left in the difference map after amending?
pub fn extra_mask_yes_or_no(input: &EvaluatorInput<'_>, config: &DecisionConfig) -> Decision {
    evaluate(DecisionStage::ExtraMask, input, config)
}

/// Without amending, is the difference map excess worth a synthetic spectrum?
pub fn only_extra_mask_yes_or_no(input: &EvaluatorInput<'_>, config: &DecisionConfig) -> Decision {
    evaluate(DecisionStage::OnlyExtraMask, input, config)
}

fn evaluate(stage: DecisionStage, input: &EvaluatorInput<'_>, config: &DecisionConfig) -> Decision {
    let th = stage.thresholds(config, input.atmospheric_issue);
    let sig = significance(stage, input.atmospheric_issue, input.snapshot, config);
    let decide = |kind| Decision {
        kind,
        level: sig.level,
        sigma_used: sig.sigma_used,
    };

    let Some(counts) = input.counts else {
        debug!("{stage:?}: no pixel counts");
        return decide(DecisionKind::No);
    };

    if counts.above > 0 {
        let growth = counts.above_lower as f64 / counts.above as f64;
        if growth > config.runaway_pixel_ratio {
            debug!("{stage:?}: runaway growth {growth:.2} between adjacent levels");
            return decide(DecisionKind::No);
        }
    }
    let signed = counts.above + counts.below;
    if signed > 0 {
        let negative = counts.below as f64 / signed as f64;
        if negative > th.negative_fraction {
            debug!("{stage:?}: negative pixel fraction {negative:.2}");
            return decide(DecisionKind::No);
        }
    }

    let snr = input.snapshot.snr();
    let enough_pixels = counts.above > config.pixel_floor;
    let cube_significant = input.cube_snr.is_some_and(|c| c > th.cube_snr);

    let kind = match stage {
        DecisionStage::AmendMask if snr > th.snr && enough_pixels => DecisionKind::YesMom,
        DecisionStage::AmendMask if snr > sig.sigma_used && cube_significant && enough_pixels => {
            DecisionKind::YesCube
        }
        DecisionStage::ExtraMask if snr > th.snr && enough_pixels => DecisionKind::YesMom,
        DecisionStage::OnlyExtraMask if snr > th.snr && cube_significant && enough_pixels => {
            DecisionKind::YesMom
        }
        _ => DecisionKind::No,
    };
    debug!("{stage:?}: snr {snr:.2}, {} pixels above {:.3} -> {kind}", counts.above, sig.level);
    decide(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(peak: f64) -> MapSnapshot {
        MapSnapshot {
            peak_inside: peak,
            peak_outside: 0.0,
            median: 0.0,
            scaled_mad: 1.0,
            pixel_sum: 0.0,
            pixel_count: 0,
            population: 10_000,
        }
    }

    fn counts(above: usize, above_lower: usize, below: usize) -> Option<PixelCounts> {
        Some(PixelCounts {
            above,
            above_lower,
            below,
        })
    }

    #[test]
    fn trivial_signal_is_no() {
        let snap = snapshot(1.0);
        let input = EvaluatorInput {
            atmospheric_issue: false,
            snapshot: &snap,
            counts: counts(20, 30, 1),
            cube_snr: Some(50.0),
        };
        let d = amend_mask_yes_or_no(&input, &DecisionConfig::default());
        assert_eq!(d.kind, DecisionKind::No);
    }

    #[test]
    fn strong_signal_is_yes_mom() {
        let snap = snapshot(30.0);
        let input = EvaluatorInput {
            atmospheric_issue: false,
            snapshot: &snap,
            counts: counts(40, 60, 2),
            cube_snr: None,
        };
        let cfg = DecisionConfig::default();
        let d = amend_mask_yes_or_no(&input, &cfg);
        assert_eq!(d.kind, DecisionKind::YesMom);
        let ten = ten_event_sigma(10_000, 10.0);
        assert_eq!(d.sigma_used, cfg.normal.amend_mask.sigma_floor.max(ten));
        assert_eq!(d.level, d.sigma_used);
    }

    #[test]
    fn guards_reject_runaway_and_negative() {
        let snap = snapshot(30.0);
        let cfg = DecisionConfig::default();
        let runaway = EvaluatorInput {
            atmospheric_issue: false,
            snapshot: &snap,
            counts: counts(40, 100, 0),
            cube_snr: None,
        };
        assert_eq!(extra_mask_yes_or_no(&runaway, &cfg).kind, DecisionKind::No);
        let negative = EvaluatorInput {
            counts: counts(40, 50, 40),
            ..runaway
        };
        assert_eq!(extra_mask_yes_or_no(&negative, &cfg).kind, DecisionKind::No);
        let few = EvaluatorInput {
            counts: counts(9, 10, 0),
            ..runaway
        };
        assert_eq!(extra_mask_yes_or_no(&few, &cfg).kind, DecisionKind::No);
    }

    #[test]
    fn only_extra_needs_cube_snr() {
        let snap = snapshot(30.0);
        let cfg = DecisionConfig::default();
        let input = EvaluatorInput {
            atmospheric_issue: false,
            snapshot: &snap,
            counts: counts(40, 50, 0),
            cube_snr: None,
        };
        assert_eq!(only_extra_mask_yes_or_no(&input, &cfg).kind, DecisionKind::No);
        let with_cube = EvaluatorInput {
            cube_snr: Some(20.0),
            ..input
        };
        assert_eq!(only_extra_mask_yes_or_no(&with_cube, &cfg).kind, DecisionKind::YesMom);
    }

    #[test]
    fn marginal_map_with_bright_cube_is_yes_cube() {
        let snap = snapshot(4.8);
        let input = EvaluatorInput {
            atmospheric_issue: false,
            snapshot: &snap,
            counts: counts(15, 20, 0),
            cube_snr: Some(12.0),
        };
        let d = amend_mask_yes_or_no(&input, &DecisionConfig::default());
        assert_eq!(d.kind, DecisionKind::YesCube);
    }

    #[test]
    fn missing_counts_is_no() {
        let snap = snapshot(30.0);
        let input = EvaluatorInput {
            atmospheric_issue: true,
            snapshot: &snap,
            counts: None,
            cube_snr: Some(100.0),
        };
        assert_eq!(amend_mask_yes_or_no(&input, &DecisionConfig::default()).kind, DecisionKind::No);
    }
}
