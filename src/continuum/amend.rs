use std::fmt;

use log::{debug, info, warn};
use serde::Serialize;

use super::baseline::BaselineStatistics;
use super::code::FourLetterCode;
use super::config::FindContinuumConfig;
use super::decision::{
    amend_mask_yes_or_no, extra_mask_yes_or_no, only_extra_mask_yes_or_no, significance, Decision,
    DecisionStage, EvaluatorInput,
};
use super::diagnostics::{Collaborators, JointMask, MapKind, StageDiagnostics};
use super::error::ContinuumResult;
use super::noise::inject_noise;
use super::selection::{reconcile, ChannelRange, ChannelSelection};
use super::sigma::{find_continuum_channels, AdjustMode, Adjusted, SigmaStep};
use super::spectrum::Spectrum;

// ---------------------------------------------------------------------------
// Stages and transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageKind {
    Original,
    AmendedMask,
    ExtraMask,
    OnlyExtraMask,
    AutoLower,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::AmendedMask => write!(f, "amended-mask"),
            Self::ExtraMask => write!(f, "extra-mask"),
            Self::OnlyExtraMask => write!(f, "only-extra-mask"),
            Self::AutoLower => write!(f, "auto-lower"),
        }
    }
}

/// Work the driver performs to enter the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Action {
    /// Grow the joint mask above `level`, then reclassify its spectrum at
    /// `sigma` in auto-lower mode.
    GrowMask { level: f64, sigma: f64 },
    /// Build a spectrum from excess emission above `level`.
    Synthesize { level: f64 },
    /// Reclassify the current spectrum at the lowered `sigma`.
    LowerSigma { sigma: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DoneReason {
    /// The stage's decision was "No".
    NoSignal,
    BudgetExhausted,
    /// `AutoLower` is always last.
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Transition {
    Next { stage: StageKind, action: Action },
    Done(DoneReason),
}

/// Decisions taken at the end of one stage; `None` where not evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StageEvaluation {
    /// Sigma the stage's selection was made with.
    pub sigma: f64,
    pub amend: Option<Decision>,
    pub extra: Option<Decision>,
    pub only_extra: Option<Decision>,
}

fn yes(d: Option<Decision>) -> Option<Decision> {
    d.filter(Decision::is_yes)
}

/// Next stage for a completed one. Pure: all I/O lives in [`run`].
pub fn transition(
    stage: StageKind,
    eval: &StageEvaluation,
    budget_left: usize,
    auto_lower_fraction: f64,
) -> Transition {
    if budget_left == 0 {
        return Transition::Done(DoneReason::BudgetExhausted);
    }
    match stage {
        StageKind::Original => {
            if let Some(d) = yes(eval.amend) {
                Transition::Next {
                    stage: StageKind::AmendedMask,
                    action: Action::GrowMask {
                        level: d.level,
                        sigma: eval.sigma,
                    },
                }
            } else if let Some(d) = yes(eval.only_extra) {
                Transition::Next {
                    stage: StageKind::OnlyExtraMask,
                    action: Action::Synthesize { level: d.level },
                }
            } else {
                Transition::Done(DoneReason::NoSignal)
            }
        }
        StageKind::AmendedMask => match yes(eval.extra) {
            Some(d) => Transition::Next {
                stage: StageKind::ExtraMask,
                action: Action::Synthesize { level: d.level },
            },
            None => Transition::Done(DoneReason::NoSignal),
        },
        StageKind::ExtraMask | StageKind::OnlyExtraMask => match yes(eval.extra) {
            Some(_) => Transition::Next {
                stage: StageKind::AutoLower,
                action: Action::LowerSigma {
                    sigma: eval.sigma * auto_lower_fraction,
                },
            },
            None => Transition::Done(DoneReason::NoSignal),
        },
        StageKind::AutoLower => Transition::Done(DoneReason::Terminal),
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageOutcome {
    Completed,
    /// The rerun reproduced the previous channel list.
    NoImprovement,
    /// Intersection with the previous selection was empty; reverted.
    EmptyIntersection,
    /// Classification produced no channels; reverted.
    EmptySelection,
    /// The image-statistics collaborator returned nothing; decisions are "No".
    MissingDiagnostics,
    /// Mask growth or spectrum synthesis returned nothing usable.
    CollaboratorFailed,
    /// Budget slot never entered.
    NotReached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub slot: usize,
    pub stage: Option<StageKind>,
    pub outcome: StageOutcome,
    pub sigma: Option<f64>,
    pub selection: Option<ChannelSelection>,
    pub diagnostics: Option<StageDiagnostics>,
    /// Decision that closed this stage.
    pub decision: Option<Decision>,
    pub sigma_steps: Vec<SigmaStep>,
}

impl StageReport {
    fn not_reached(slot: usize) -> Self {
        Self {
            slot,
            stage: None,
            outcome: StageOutcome::NotReached,
            sigma: None,
            selection: None,
            diagnostics: None,
            decision: None,
            sigma_steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Warnings {
    /// Selected channels below the low-bandwidth fraction of the spectrum.
    pub low_bandwidth: bool,
    /// First-to-last selected span below the low-spread fraction.
    pub low_spread: bool,
}

impl Warnings {
    pub fn of(selection: &ChannelSelection, channels: usize, config: &FindContinuumConfig) -> Self {
        let n = channels as f64;
        Self {
            low_bandwidth: (selection.channel_count() as f64) < n * config.amendment.low_bandwidth_fraction,
            low_spread: (selection.spread() as f64) < n * config.amendment.low_spread_fraction,
        }
    }
}

/// Outcome of a full continuum-finding run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuumReport {
    pub selection: ChannelSelection,
    pub sigma: f64,
    /// One entry per budget slot, `Original` first.
    pub stages: Vec<StageReport>,
    /// Stage whose selection was accepted.
    pub final_stage: StageKind,
    /// Original versus final difference map.
    pub code: Option<FourLetterCode>,
    /// Amendments were discarded in favour of the `Original` selection.
    pub reverted: bool,
    /// Range appended to a narrow, clustered selection.
    pub appended: Option<ChannelRange>,
    pub dropped_narrow: usize,
    pub warnings: Warnings,
    pub baseline: BaselineStatistics,
    pub trend: Option<Vec<f64>>,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Per-run inputs.
#[derive(Debug, Clone)]
pub struct AmendmentInput<'a> {
    pub spectrum: &'a Spectrum,
    pub mask: JointMask,
    /// Coarse (TDM-like) spectral setup; only picks the starting sigma.
    pub tdm: bool,
    pub atmospheric_issue: bool,
}

struct StageState {
    kind: StageKind,
    adjusted: Adjusted,
    selection: ChannelSelection,
    mask: JointMask,
    diagnostics: Option<StageDiagnostics>,
}

/// Run `Original` plus up to `budget` amendment stages.
///
/// Only the `Original` classification can fail; later stages that cannot
/// be built are recorded and the run keeps the last good selection.
pub fn run<C: Collaborators + ?Sized>(
    input: &AmendmentInput<'_>,
    config: &FindContinuumConfig,
    collab: &mut C,
) -> ContinuumResult<ContinuumReport> {
    let budget = config.amendment.effective_budget();
    let sigma0 = config.sigma.starting_sigma(input.tdm);
    let adjusted = find_continuum_channels(input.spectrum, sigma0, AdjustMode::Normal, config)?;
    let selection = adjusted.classification.selection.clone();
    let diagnostics = collab.measure(&selection, &input.mask);
    info!("original: sigma {:.3}, selection {selection}", adjusted.sigma);

    let original = StageState {
        kind: StageKind::Original,
        adjusted,
        selection,
        mask: input.mask.clone(),
        diagnostics,
    };
    let mut later: Vec<StageState> = Vec::new();
    let mut reports = vec![report_for(0, &original, StageOutcome::Completed)];

    loop {
        let slot = later.len();
        let current = later.last().unwrap_or(&original);

        let eval = evaluate(current, input.atmospheric_issue, config, collab);
        if current.diagnostics.is_none() {
            reports[slot].outcome = StageOutcome::MissingDiagnostics;
        }
        reports[slot].decision = closing_decision(current.kind, &eval);

        let budget_left = budget.saturating_sub(slot);
        let (next_kind, action) =
            match transition(current.kind, &eval, budget_left, config.amendment.auto_lower_fraction) {
                Transition::Next { stage, action } => (stage, action),
                Transition::Done(reason) => {
                    debug!("{} done: {reason:?}", current.kind);
                    break;
                }
            };
        info!("{} -> {next_kind}: {action:?}", current.kind);

        let Some(mut next) = enter(current, next_kind, action, slot + 1, input, config, collab) else {
            reports.push(StageReport {
                stage: Some(next_kind),
                outcome: StageOutcome::CollaboratorFailed,
                ..StageReport::not_reached(slot + 1)
            });
            break;
        };

        // Empty, identical or disjoint results end the run on the current stage.
        if next.selection.is_empty() {
            warn!("{next_kind} selected no channels, keeping {}", current.kind);
            reports.push(StageReport {
                selection: None,
                ..report_for(slot + 1, &next, StageOutcome::EmptySelection)
            });
            break;
        }
        if next.selection == current.selection {
            info!("{next_kind} reproduced the {} selection", current.kind);
            reports[slot].decision = reports[slot].decision.map(Decision::no_improvement);
            reports.push(report_for(slot + 1, &next, StageOutcome::NoImprovement));
            break;
        }
        if next_kind != StageKind::AmendedMask {
            let (kept, reverted) = reconcile(&current.selection, &next.selection);
            if reverted {
                warn!("{next_kind} selection is disjoint from {}, reverting", current.kind);
                reports.push(report_for(slot + 1, &next, StageOutcome::EmptyIntersection));
                break;
            }
            if kept != next.selection {
                next.selection = kept;
                next.diagnostics = collab.measure(&next.selection, &next.mask);
            }
        }

        reports.push(report_for(slot + 1, &next, StageOutcome::Completed));
        later.push(next);
    }

    while reports.len() < budget + 1 {
        reports.push(StageReport::not_reached(reports.len()));
    }

    finish(original, later, reports, input, config, collab)
}

/// The decision that moved a stage on (or stopped it).
fn closing_decision(kind: StageKind, eval: &StageEvaluation) -> Option<Decision> {
    match kind {
        StageKind::Original => match eval.amend {
            Some(d) if d.is_yes() => Some(d),
            amend => eval.only_extra.or(amend),
        },
        _ => eval.extra,
    }
}

fn report_for(slot: usize, state: &StageState, outcome: StageOutcome) -> StageReport {
    StageReport {
        slot,
        stage: Some(state.kind),
        outcome,
        sigma: Some(state.adjusted.sigma),
        selection: Some(state.selection.clone()),
        diagnostics: state.diagnostics,
        decision: None,
        sigma_steps: state.adjusted.reruns.clone(),
    }
}

fn evaluate<C: Collaborators + ?Sized>(
    state: &StageState,
    atmospheric_issue: bool,
    config: &FindContinuumConfig,
    collab: &mut C,
) -> StageEvaluation {
    let mut eval = StageEvaluation {
        sigma: state.adjusted.sigma,
        ..StageEvaluation::default()
    };
    let Some(diag) = state.diagnostics else {
        debug!("{}: no diagnostics, treating as No", state.kind);
        let no = Some(Decision::no());
        return StageEvaluation {
            amend: no,
            extra: no,
            only_extra: no,
            ..eval
        };
    };

    let mut decide = |stage: DecisionStage, map: MapKind| {
        let snapshot = diag.map(map);
        let sig = significance(stage, atmospheric_issue, snapshot, &config.decision);
        let counts = collab.count_pixels(&state.selection, map, &sig.levels);
        let input = EvaluatorInput {
            atmospheric_issue,
            snapshot,
            counts,
            cube_snr: diag.cube_snr,
        };
        match stage {
            DecisionStage::AmendMask => amend_mask_yes_or_no(&input, &config.decision),
            DecisionStage::ExtraMask => extra_mask_yes_or_no(&input, &config.decision),
            DecisionStage::OnlyExtraMask => only_extra_mask_yes_or_no(&input, &config.decision),
        }
    };

    match state.kind {
        StageKind::Original => {
            let amend = decide(DecisionStage::AmendMask, MapKind::Signal);
            eval.amend = Some(amend);
            if !amend.is_yes() {
                eval.only_extra = Some(decide(DecisionStage::OnlyExtraMask, MapKind::Difference));
            }
        }
        StageKind::AmendedMask | StageKind::ExtraMask | StageKind::OnlyExtraMask => {
            eval.extra = Some(decide(DecisionStage::ExtraMask, MapKind::Difference));
        }
        StageKind::AutoLower => {}
    }
    eval
}

/// Execute `action`; `None` when a collaborator or the reclassification
/// cannot deliver.
fn enter<C: Collaborators + ?Sized>(
    current: &StageState,
    kind: StageKind,
    action: Action,
    slot: usize,
    input: &AmendmentInput<'_>,
    config: &FindContinuumConfig,
    collab: &mut C,
) -> Option<StageState> {
    let (spectrum, mask, sigma, mode) = match action {
        Action::GrowMask { level, sigma } => {
            let mask = collab.grow_mask(&current.mask, level)?;
            let values = collab.mask_spectrum(&mask)?;
            let spectrum = rebuild(input.spectrum, values)?;
            (spectrum, mask, sigma, AdjustMode::AutoLower)
        }
        Action::Synthesize { level } => {
            let values = collab.excess_spectrum(&current.mask, level)?;
            let seed = config.amendment.noise_seed.wrapping_add(slot as u64);
            let values = inject_noise(&values, input.spectrum.mask(), &current.selection, seed);
            let spectrum = rebuild(input.spectrum, values)?;
            (spectrum, current.mask.clone(), current.adjusted.sigma, AdjustMode::Normal)
        }
        Action::LowerSigma { sigma } => (
            current.adjusted.spectrum.clone(),
            current.mask.clone(),
            sigma,
            AdjustMode::AutoLower,
        ),
    };

    let adjusted = match find_continuum_channels(&spectrum, sigma, mode, config) {
        Ok(a) => a,
        Err(e) => {
            warn!("{kind}: classification failed: {e}");
            return None;
        }
    };
    let selection = adjusted.classification.selection.clone();
    let diagnostics = collab.measure(&selection, &mask);
    Some(StageState {
        kind,
        adjusted,
        selection,
        mask,
        diagnostics,
    })
}

/// Spectrum from collaborator values, sharing the input's channel mask.
fn rebuild(original: &Spectrum, values: Vec<f64>) -> Option<Spectrum> {
    match original.with_values(values) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("collaborator spectrum rejected: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Final accept / revert and bandwidth rescue
// ---------------------------------------------------------------------------

fn finish<C: Collaborators + ?Sized>(
    original: StageState,
    mut later: Vec<StageState>,
    reports: Vec<StageReport>,
    input: &AmendmentInput<'_>,
    config: &FindContinuumConfig,
    collab: &mut C,
) -> ContinuumResult<ContinuumReport> {
    let mut code = None;
    let mut reverted = false;
    if let Some(last) = later.last() {
        match (original.diagnostics, last.diagnostics) {
            (Some(orig), Some(fin)) => {
                let c = FourLetterCode::compare(&orig.difference, &fin.difference, config.amendment.same_threshold);
                let floor = significance(
                    DecisionStage::ExtraMask,
                    input.atmospheric_issue,
                    &fin.difference,
                    &config.decision,
                )
                .sigma_used;
                if c.is_in(&config.amendment.all_worse) && fin.difference.snr() > floor {
                    info!("amendments made things worse ({c}), reverting to the original selection");
                    reverted = true;
                }
                code = Some(c);
            }
            _ => debug!("final comparison skipped: diagnostics missing"),
        }
    }

    let original_subset = original.adjusted.stats.subset_channels.clone();
    let accepted = match later.pop() {
        Some(last) if !reverted => last,
        _ => original,
    };

    let n = input.spectrum.len();
    let mut selection = accepted.selection.clone();
    let mut appended = None;
    let warnings = Warnings::of(&selection, n, config);
    if warnings.low_bandwidth && warnings.low_spread {
        if let Some(extra) = opposite_run(&selection, &original_subset, n) {
            let widened = selection.union(&ChannelSelection::from_ranges([extra]));
            if accept_widened(&accepted, &widened, config, collab) {
                info!("appended {extra} to a narrow selection");
                selection = widened;
                appended = Some(extra);
            } else {
                debug!("appending {extra} does not hold up, dropped");
            }
        }
    }

    Ok(ContinuumReport {
        warnings: Warnings::of(&selection, n, config),
        selection,
        sigma: accepted.adjusted.sigma,
        stages: reports,
        final_stage: accepted.kind,
        code,
        reverted,
        appended,
        dropped_narrow: accepted.adjusted.classification.dropped_narrow,
        baseline: accepted.adjusted.stats,
        trend: accepted.adjusted.trend,
    })
}

/// Longest contiguous run of baseline channels on the half of the spectrum
/// away from `selection`, excluding channels already selected.
fn opposite_run(selection: &ChannelSelection, baseline: &[usize], n: usize) -> Option<ChannelRange> {
    let centre = selection.centroid()?;
    let half = n as f64 / 2.0;
    let pool = baseline
        .iter()
        .copied()
        .filter(|&c| if centre < half { c as f64 >= half } else { (c as f64) < half })
        .filter(|&c| !selection.contains(c));
    ChannelSelection::from_channels(pool)
        .ranges()
        .iter()
        .copied()
        .max_by_key(|r| (r.width(), std::cmp::Reverse(r.lo)))
}

/// Keep the widened selection only if measurable and not worse under the
/// loose comparison.
fn accept_widened<C: Collaborators + ?Sized>(
    accepted: &StageState,
    widened: &ChannelSelection,
    config: &FindContinuumConfig,
    collab: &mut C,
) -> bool {
    let Some(before) = accepted.diagnostics else {
        return false;
    };
    let Some(after) = collab.measure(widened, &accepted.mask) else {
        return false;
    };
    let c = FourLetterCode::compare(&before.difference, &after.difference, config.amendment.loose_same_threshold);
    !c.is_in(&config.amendment.all_worse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuum::decision::DecisionKind;

    fn decision(kind: DecisionKind, level: f64) -> Option<Decision> {
        Some(Decision {
            kind,
            level,
            sigma_used: 4.0,
        })
    }

    fn eval(amend: Option<Decision>, extra: Option<Decision>, only_extra: Option<Decision>) -> StageEvaluation {
        StageEvaluation {
            sigma: 3.5,
            amend,
            extra,
            only_extra,
        }
    }

    #[test]
    fn zero_budget_is_done() {
        let e = eval(decision(DecisionKind::YesMom, 1.0), None, None);
        assert_eq!(
            transition(StageKind::Original, &e, 0, 0.85),
            Transition::Done(DoneReason::BudgetExhausted)
        );
    }

    #[test]
    fn original_prefers_amending() {
        let e = eval(decision(DecisionKind::YesCube, 2.0), None, decision(DecisionKind::YesMom, 3.0));
        assert_eq!(
            transition(StageKind::Original, &e, 2, 0.85),
            Transition::Next {
                stage: StageKind::AmendedMask,
                action: Action::GrowMask { level: 2.0, sigma: 3.5 },
            }
        );
        let e = eval(decision(DecisionKind::No, 2.0), None, decision(DecisionKind::YesMom, 3.0));
        assert_eq!(
            transition(StageKind::Original, &e, 2, 0.85),
            Transition::Next {
                stage: StageKind::OnlyExtraMask,
                action: Action::Synthesize { level: 3.0 },
            }
        );
        let e = eval(decision(DecisionKind::No, 2.0), None, decision(DecisionKind::No, 3.0));
        assert_eq!(transition(StageKind::Original, &e, 2, 0.85), Transition::Done(DoneReason::NoSignal));
    }

    #[test]
    fn extra_stages_lower_sigma() {
        let e = eval(None, decision(DecisionKind::YesMom, 1.5), None);
        assert_eq!(
            transition(StageKind::AmendedMask, &e, 1, 0.85),
            Transition::Next {
                stage: StageKind::ExtraMask,
                action: Action::Synthesize { level: 1.5 },
            }
        );
        match transition(StageKind::OnlyExtraMask, &e, 1, 0.85) {
            Transition::Next {
                stage: StageKind::AutoLower,
                action: Action::LowerSigma { sigma },
            } => assert!((sigma - 3.5 * 0.85).abs() < 1e-12),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transition(StageKind::AutoLower, &e, 3, 0.85), Transition::Done(DoneReason::Terminal));
        let no = eval(None, decision(DecisionKind::NoImprovement, 1.5), None);
        assert_eq!(transition(StageKind::ExtraMask, &no, 1, 0.85), Transition::Done(DoneReason::NoSignal));
    }

    #[test]
    fn run_of_baseline_channels_on_far_half() {
        let sel: ChannelSelection = "0~9".parse().unwrap();
        let baseline = [3, 4, 60, 61, 62, 80, 81, 82, 83, 84, 85];
        assert_eq!(opposite_run(&sel, &baseline, 100), Some(ChannelRange::new(80, 85)));
        let sel: ChannelSelection = "90~95".parse().unwrap();
        assert_eq!(opposite_run(&sel, &baseline, 100), Some(ChannelRange::new(3, 4)));
        assert_eq!(opposite_run(&ChannelSelection::empty(), &baseline, 100), None);
    }
}
