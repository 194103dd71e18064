use super::error::{ContinuumError, ContinuumResult};

// ---------------------------------------------------------------------------
// Spectrum – one intensity value per channel plus a validity mask
// ---------------------------------------------------------------------------

/// Read-only input to a classification call.
///
/// Channels that are masked out by the caller, or hold a non-finite value,
/// are permanently invalid: they never enter statistics and are never
/// selected.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    values: Vec<f64>,
    valid: Vec<bool>,
}

impl Spectrum {
    /// Build a spectrum where every finite channel is valid.
    pub fn new(values: Vec<f64>) -> ContinuumResult<Self> {
        let mask = vec![true; values.len()];
        Self::with_mask(values, mask)
    }

    /// Build a spectrum with an explicit channel mask (`true` = usable).
    pub fn with_mask(values: Vec<f64>, mask: Vec<bool>) -> ContinuumResult<Self> {
        if values.is_empty() {
            return Err(ContinuumError::EmptySpectrum);
        }
        if mask.len() != values.len() {
            return Err(ContinuumError::MaskLengthMismatch {
                mask: mask.len(),
                channels: values.len(),
            });
        }
        let valid: Vec<bool> = values
            .iter()
            .zip(mask)
            .map(|(v, m)| m && v.is_finite())
            .collect();
        if !valid.iter().any(|&v| v) {
            return Err(ContinuumError::NoValidChannels);
        }
        Ok(Self { values, valid })
    }

    /// Same validity mask, new values (used for detrended and synthesized
    /// spectra). Channels that become non-finite are invalidated.
    pub fn with_values(&self, values: Vec<f64>) -> ContinuumResult<Self> {
        Self::with_mask(values, self.valid.clone())
    }

    /// Number of channels, valid or not.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false for a constructed spectrum; kept for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn value(&self, channel: usize) -> f64 {
        self.values[channel]
    }

    pub fn is_valid(&self, channel: usize) -> bool {
        self.valid[channel]
    }

    pub fn mask(&self) -> &[bool] {
        &self.valid
    }

    /// Indices of the usable channels, ascending.
    pub fn valid_channels(&self) -> Vec<usize> {
        (0..self.values.len()).filter(|&i| self.valid[i]).collect()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Values of the given channels, in the given order.
    pub fn gather(&self, channels: &[usize]) -> Vec<f64> {
        channels.iter().map(|&c| self.values[c]).collect()
    }

    /// Channels belonging to a run of identical values touching either end
    /// of the spectrum (flagged or padded edges). A run of one channel is not
    /// an artifact.
    pub fn edge_artifact_channels(&self) -> Vec<usize> {
        let n = self.values.len();
        let mut out = Vec::new();

        let first = self.values[0];
        let lead = self.values.iter().take_while(|&&v| v == first).count();
        if lead > 1 {
            out.extend(0..lead);
        }
        if lead == n {
            return out;
        }

        let last = self.values[n - 1];
        let tail = self.values.iter().rev().take_while(|&&v| v == last).count();
        if tail > 1 {
            out.extend(n - tail..n);
        }
        out
    }

    /// Valid channels minus the edge-artifact runs.
    pub fn usable_channels(&self) -> Vec<usize> {
        let edges = self.edge_artifact_channels();
        let mut usable = self.valid.clone();
        for c in edges {
            usable[c] = false;
        }
        (0..self.values.len()).filter(|&i| usable[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_mismatched_input() {
        assert_eq!(Spectrum::new(vec![]), Err(ContinuumError::EmptySpectrum));
        assert_eq!(
            Spectrum::with_mask(vec![1.0, 2.0], vec![true]),
            Err(ContinuumError::MaskLengthMismatch { mask: 1, channels: 2 })
        );
        assert_eq!(
            Spectrum::new(vec![f64::NAN, f64::NAN]),
            Err(ContinuumError::NoValidChannels)
        );
    }

    #[test]
    fn nan_channels_are_invalid() {
        let sp = Spectrum::new(vec![1.0, f64::NAN, 3.0]).unwrap();
        assert_eq!(sp.valid_channels(), vec![0, 2]);
        assert_eq!(sp.valid_count(), 2);
    }

    #[test]
    fn edge_runs_are_detected() {
        let sp = Spectrum::new(vec![0.0, 0.0, 0.0, 1.0, 2.0, 1.5, 7.0, 7.0]).unwrap();
        assert_eq!(sp.edge_artifact_channels(), vec![0, 1, 2, 6, 7]);
        assert_eq!(sp.usable_channels(), vec![3, 4, 5]);
    }

    #[test]
    fn single_edge_value_is_not_an_artifact() {
        let sp = Spectrum::new(vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert!(sp.edge_artifact_channels().is_empty());
    }
}
