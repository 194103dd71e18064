use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::selection::ChannelSelection;
use super::stats::{median, scaled_mad};

/// Continuum channels taken from each side of a line channel when matching
/// the local noise.
pub const NOISE_NEIGHBOURS: usize = 8;

/// Replace every valid channel outside `continuum` with Gaussian noise whose
/// median and scaled MAD match the nearest continuum channels.
///
/// Neighbours are the closest `NOISE_NEIGHBOURS` continuum channels on each
/// side; with fewer than two, the statistics of all continuum channels are
/// used instead. The same seed always yields the same spectrum.
pub fn inject_noise(values: &[f64], valid: &[bool], continuum: &ChannelSelection, seed: u64) -> Vec<f64> {
    let chans: Vec<usize> = continuum
        .channels()
        .into_iter()
        .filter(|&c| c < values.len() && valid.get(c).copied().unwrap_or(false))
        .collect();
    if chans.len() < 2 {
        debug!("too few continuum channels ({}) to inject noise", chans.len());
        return values.to_vec();
    }

    let all: Vec<f64> = chans.iter().map(|&c| values[c]).collect();
    let global = (median(&all), scaled_mad(&all));

    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = values.to_vec();
    let mut replaced = 0usize;
    for (c, v) in out.iter_mut().enumerate() {
        if !valid.get(c).copied().unwrap_or(false) || continuum.contains(c) {
            continue;
        }
        let (level, spread) = local_stats(values, &chans, c).unwrap_or(global);
        *v = match Normal::new(level, spread) {
            Ok(dist) if spread > 0.0 => dist.sample(&mut rng),
            _ => level,
        };
        replaced += 1;
    }
    debug!("injected noise into {replaced} line channels");
    out
}

fn local_stats(values: &[f64], chans: &[usize], channel: usize) -> Option<(f64, f64)> {
    let split = chans.partition_point(|&c| c < channel);
    let below = &chans[split.saturating_sub(NOISE_NEIGHBOURS)..split];
    let above = &chans[split..(split + NOISE_NEIGHBOURS).min(chans.len())];
    let near: Vec<f64> = below.iter().chain(above).map(|&c| values[c]).collect();
    if near.len() < 2 {
        return None;
    }
    Some((median(&near), scaled_mad(&near)))
}
