use serde::{Deserialize, Serialize};

use super::selection::ChannelSelection;

// ---------------------------------------------------------------------------
// Image-level diagnostics supplied from outside the core
// ---------------------------------------------------------------------------

/// The two derived maps an image-statistics provider reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapKind {
    /// Peak-over-continuum signal map.
    Signal,
    /// Signal minus the continuum model built from the current selection.
    Difference,
}

/// Summary of one map for one channel selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapSnapshot {
    /// Peak inside the joint mask.
    pub peak_inside: f64,
    /// Peak outside the joint mask.
    pub peak_outside: f64,
    pub median: f64,
    pub scaled_mad: f64,
    /// Sum of pixels inside the joint mask.
    pub pixel_sum: f64,
    /// Pixels inside the joint mask.
    pub pixel_count: usize,
    /// Pixels that entered the statistics.
    pub population: usize,
}

impl MapSnapshot {
    /// `(max(peak_inside, peak_outside) - median) / scaled_mad`; zero when
    /// the MAD is degenerate.
    pub fn snr(&self) -> f64 {
        if self.scaled_mad > 0.0 {
            (self.peak_inside.max(self.peak_outside) - self.median) / self.scaled_mad
        } else {
            0.0
        }
    }

    /// Intensity `sigma` scaled MADs above the median.
    pub fn level(&self, sigma: f64) -> f64 {
        self.median + sigma * self.scaled_mad
    }
}

/// Everything measured for one stage's selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    pub signal: MapSnapshot,
    pub difference: MapSnapshot,
    /// Peak SNR of the raw cube, when the provider can compute it.
    pub cube_snr: Option<f64>,
}

impl StageDiagnostics {
    pub fn map(&self, kind: MapKind) -> &MapSnapshot {
        match kind {
            MapKind::Signal => &self.signal,
            MapKind::Difference => &self.difference,
        }
    }
}

/// Intensity levels at which pixels are counted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountLevels {
    pub upper: f64,
    /// One step below `upper`, for the runaway-growth guard.
    pub lower: f64,
    /// Mirror of `upper` below the median.
    pub negative: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelCounts {
    /// Pixels above `CountLevels::upper`.
    pub above: usize,
    /// Pixels above `CountLevels::lower`.
    pub above_lower: usize,
    /// Pixels below `CountLevels::negative`.
    pub below: usize,
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Spatial mask over the image plane, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JointMask {
    pub pixels: Vec<bool>,
}

impl JointMask {
    pub fn new(pixels: Vec<bool>) -> Self {
        Self { pixels }
    }

    pub fn count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p).count()
    }
}

/// Per-stage image statistics. `None` means the diagnostics could not be
/// produced; the core treats that as a "No" decision.
pub trait ImageStatistics {
    fn measure(&mut self, selection: &ChannelSelection, mask: &JointMask) -> Option<StageDiagnostics>;

    /// Count pixels of the map last measured for `selection`.
    fn count_pixels(
        &mut self,
        selection: &ChannelSelection,
        kind: MapKind,
        levels: &CountLevels,
    ) -> Option<PixelCounts>;
}

pub trait MaskGrowth {
    /// Union of `mask` with the pixels brighter than `level`.
    fn grow_mask(&mut self, mask: &JointMask, level: f64) -> Option<JointMask>;
}

pub trait SpectrumSynthesis {
    /// Mean spectrum over the pixels of `mask`.
    fn mask_spectrum(&mut self, mask: &JointMask) -> Option<Vec<f64>>;

    /// Spectrum of the pixels in `mask`'s excess region that exceed `level`.
    fn excess_spectrum(&mut self, mask: &JointMask, level: f64) -> Option<Vec<f64>>;
}

/// All three collaborators behind one bound.
pub trait Collaborators: ImageStatistics + MaskGrowth + SpectrumSynthesis {}

impl<T: ImageStatistics + MaskGrowth + SpectrumSynthesis> Collaborators for T {}

/// Collaborator for a bare spectrum with no image behind it: every request
/// comes back empty, so only the `Original` stage can run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCube;

impl ImageStatistics for NoCube {
    fn measure(&mut self, _: &ChannelSelection, _: &JointMask) -> Option<StageDiagnostics> {
        None
    }

    fn count_pixels(&mut self, _: &ChannelSelection, _: MapKind, _: &CountLevels) -> Option<PixelCounts> {
        None
    }
}

impl MaskGrowth for NoCube {
    fn grow_mask(&mut self, _: &JointMask, _: f64) -> Option<JointMask> {
        None
    }
}

impl SpectrumSynthesis for NoCube {
    fn mask_spectrum(&mut self, _: &JointMask) -> Option<Vec<f64>> {
        None
    }

    fn excess_spectrum(&mut self, _: &JointMask, _: f64) -> Option<Vec<f64>> {
        None
    }
}
