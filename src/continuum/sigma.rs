use log::{debug, info};
use serde::Serialize;

use super::baseline::BaselineStatistics;
use super::classifier::{classify, Classification};
use super::config::{FindContinuumConfig, SigmaConfig, TrendOrder};
use super::error::ContinuumResult;
use super::selection::ChannelSelection;
use super::spectrum::Spectrum;
use super::stats::{median, polyfit, polyval};

// ---------------------------------------------------------------------------
// Adaptive sigma
// ---------------------------------------------------------------------------

/// `AutoLower` uses the gentler lowering ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdjustMode {
    Normal,
    AutoLower,
}

/// Why sigma was changed between two classifier passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SigmaRule {
    /// Only isolated one-channel peaks: treat them as noise.
    Singletons,
    /// Many groups or a lopsided above/below split: admit more continuum.
    Skew,
    /// A strong line inflates the selection's spread: tighten.
    StrongLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SigmaStep {
    pub rule: SigmaRule,
    pub from: f64,
    pub to: f64,
}

/// Final classifier pass and how it was reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjusted {
    pub classification: Classification,
    pub stats: BaselineStatistics,
    pub initial_sigma: f64,
    pub sigma: f64,
    pub reruns: Vec<SigmaStep>,
    /// Removed polynomial, lowest order first.
    pub trend: Option<Vec<f64>>,
    /// Spectrum the final pass classified (detrended when `trend` is set).
    #[serde(skip)]
    pub spectrum: Spectrum,
}

/// Classify `spectrum` at `sigma`, then correct sigma a bounded number of
/// times based on what the pass saw.
///
/// A configured detrend runs right after the first pass, fitted over its
/// selection. The reruns then classify the flattened spectrum, so the last
/// pass is always the one reported.
pub fn find_continuum_channels(
    spectrum: &Spectrum,
    sigma: f64,
    mode: AdjustMode,
    config: &FindContinuumConfig,
) -> ContinuumResult<Adjusted> {
    let (stats, classification) = pass(spectrum, sigma, config)?;
    let mut adjusted = Adjusted {
        classification,
        stats,
        initial_sigma: sigma,
        sigma,
        reruns: Vec::new(),
        trend: None,
        spectrum: spectrum.clone(),
    };
    if let Some(order) = config.sigma.detrend {
        try_detrend(&mut adjusted, order, config)?;
    }

    while adjusted.reruns.len() < config.sigma.max_reruns {
        let fired: Vec<SigmaRule> = adjusted.reruns.iter().map(|s| s.rule).collect();
        let valid = adjusted.spectrum.valid_count();
        let Some((rule, factor)) = next_rule(&adjusted.classification, &fired, mode, &config.sigma, valid) else {
            break;
        };
        let current = adjusted.sigma;
        let next = current * factor;
        info!("sigma {current:.3} -> {next:.3} ({rule:?})");
        adjusted.reruns.push(SigmaStep {
            rule,
            from: current,
            to: next,
        });
        let (stats, classification) = pass(&adjusted.spectrum, next, config)?;
        adjusted.sigma = next;
        adjusted.stats = stats;
        adjusted.classification = classification;
    }
    Ok(adjusted)
}

fn pass(spectrum: &Spectrum, sigma: f64, config: &FindContinuumConfig) -> ContinuumResult<(BaselineStatistics, Classification)> {
    let stats = BaselineStatistics::compute(spectrum, sigma, &config.baseline)?;
    let cls = classify(spectrum, sigma, &stats, &config.classifier);
    debug!(
        "sigma {sigma:.3}: {} groups, {} channels, {} single / {} multi peaks",
        cls.group_count,
        cls.selection.channel_count(),
        cls.single_channel_peaks,
        cls.multi_channel_peaks
    );
    Ok((stats, cls))
}

/// The rule that fires for `cls`, with its sigma factor. Each rule fires at
/// most once; `Skew` and `StrongLine` exclude each other.
pub(crate) fn next_rule(
    cls: &Classification,
    fired: &[SigmaRule],
    mode: AdjustMode,
    cfg: &SigmaConfig,
    valid_channels: usize,
) -> Option<(SigmaRule, f64)> {
    let allowed = |r: SigmaRule| {
        !fired.contains(&r)
            && !(r == SigmaRule::Skew && fired.contains(&SigmaRule::StrongLine))
            && !(r == SigmaRule::StrongLine && fired.contains(&SigmaRule::Skew))
    };
    let groups = cls.group_count;

    if allowed(SigmaRule::Singletons) && cls.multi_channel_peaks == 0 && cls.single_channel_peaks > 1 {
        return Some((SigmaRule::Singletons, cfg.singleton_factor));
    }

    let ratio = cls.skew_ratio();
    let skewed = ratio > cfg.skew_upper || ratio < cfg.skew_lower;
    if allowed(SigmaRule::Skew) && (groups >= cfg.many_groups || skewed) {
        let raw = if groups <= 2 {
            3f64.ln() / 2f64.ln()
        } else {
            (groups as f64).ln() / 3f64.ln()
        };
        let selected = if valid_channels > 0 {
            cls.selection.channel_count() as f64 / valid_channels as f64
        } else {
            0.0
        };
        let factor = (1.0 + (raw - 1.0) * (1.0 - selected)).min(cfg.skew_max_factor);
        if factor > 1.0 {
            return Some((SigmaRule::Skew, factor));
        }
    }

    if allowed(SigmaRule::StrongLine)
        && cls.selection_mad_ratio > cfg.mad_ratio_cutoff
        && cls.peak_over_mad > cfg.line_snr_cutoff
        && groups > cfg.lower_min_groups
    {
        let base = match mode {
            AdjustMode::Normal => cfg.lower_ratio,
            AdjustMode::AutoLower => cfg.lower_ratio_auto_lower,
        };
        let crowding = (groups as f64 / cfg.lower_group_ceiling as f64).min(1.0);
        let factor = base + (1.0 - base) * crowding;
        if factor < 1.0 {
            return Some((SigmaRule::StrongLine, factor));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Optional baseline detrending
// ---------------------------------------------------------------------------

/// Subtract a polynomial fitted over `selection`, keeping the fitted level.
pub fn detrend(spectrum: &Spectrum, selection: &ChannelSelection, order: TrendOrder) -> Option<(Spectrum, Vec<f64>)> {
    let chans: Vec<usize> = selection
        .channels()
        .into_iter()
        .filter(|&c| c < spectrum.len() && spectrum.is_valid(c))
        .collect();
    let x: Vec<f64> = chans.iter().map(|&c| c as f64).collect();
    let y = spectrum.gather(&chans);
    let coeffs = polyfit(&x, &y, order.degree())?;
    let fitted: Vec<f64> = x.iter().map(|&c| polyval(&coeffs, c)).collect();
    let level = median(&fitted);

    let values: Vec<f64> = spectrum
        .values()
        .iter()
        .enumerate()
        .map(|(c, &v)| v - polyval(&coeffs, c as f64) + level)
        .collect();
    let out = spectrum.with_values(values).ok()?;
    Some((out, coeffs))
}

fn try_detrend(adjusted: &mut Adjusted, order: TrendOrder, config: &FindContinuumConfig) -> ContinuumResult<()> {
    let original = adjusted.spectrum.clone();
    let before = adjusted.stats.scaled_mad;
    let Some((flat, _)) = detrend(&original, &adjusted.classification.selection, order) else {
        debug!("detrend fit failed");
        return Ok(());
    };
    let (flat_stats, flat_cls) = pass(&flat, adjusted.sigma, config)?;
    if flat_stats.scaled_mad <= 0.0 || before / flat_stats.scaled_mad <= config.sigma.detrend_improvement {
        debug!("detrend does not improve the baseline MAD ({before:.4} vs {:.4})", flat_stats.scaled_mad);
        return Ok(());
    }

    // Refit over the channels the flattened spectrum selects.
    let Some((refit, coeffs)) = detrend(&original, &flat_cls.selection, order) else {
        return Ok(());
    };
    let (stats, cls) = pass(&refit, adjusted.sigma, config)?;
    if stats.scaled_mad > before {
        debug!("refit trend worsens the baseline MAD, keeping the raw spectrum");
        return Ok(());
    }
    info!("removed order-{} trend, baseline MAD {before:.4} -> {:.4}", order.degree(), stats.scaled_mad);
    adjusted.stats = stats;
    adjusted.classification = cls;
    adjusted.spectrum = refit;
    adjusted.trend = Some(coeffs);
    Ok(())
}
